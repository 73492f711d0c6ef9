//! Compaction: picking inputs (in the version set), the shape of a single
//! compaction, and the background worker that runs them.

pub mod scheduler;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::manifest::edit::VersionEdit;
use crate::manifest::version::{FileMetaData, Version, total_file_size};
use crate::types::NUM_LEVELS;

pub use scheduler::{BackgroundWorker, Task};

/// A compaction of `inputs[0]` (files of `level`) with `inputs[1]` (the
/// overlapping files of `level + 1`), producing files in `level + 1`.
pub struct Compaction {
    pub level: usize,
    pub input_version: Arc<Version>,
    pub edit: VersionEdit,
    pub inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files of `level + 2` overlapping the compaction range.
    pub grandparents: Vec<Arc<FileMetaData>>,
    icmp: InternalKeyComparator,
    max_output_file_size: u64,
    max_grandparent_overlap_bytes: u64,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
    /// Per-level cursors for `is_base_level_for_key`, which is called with
    /// increasing keys.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(
        level: usize,
        input_version: Arc<Version>,
        icmp: InternalKeyComparator,
        max_output_file_size: u64,
        max_grandparent_overlap_bytes: u64,
    ) -> Self {
        Compaction {
            level,
            input_version,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            icmp,
            max_output_file_size,
            max_grandparent_overlap_bytes,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single input with nothing to merge against can be relinked into the
    /// next level. Too much grandparent overlap would make a later merge of
    /// that file expensive, so it is merged instead.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes
    }

    /// Record the removal of every input file in `edit`.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for f in &self.inputs[which] {
                self.edit.delete_file(self.level + which, f.number);
            }
        }
    }

    /// True when no level below the output level can contain `user_key`,
    /// so a tombstone for it has nothing left to shadow.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        for level in self.level + 2..NUM_LEVELS {
            let files = self.input_version.files(level);
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest_user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, f.smallest_user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Whether the current output should be closed before `internal_key`
    /// because it already overlaps too much of the grandparent level.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self.icmp.compare(
                internal_key,
                &self.grandparents[self.grandparent_index].largest,
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }

    /// Bytes read from each input level.
    pub fn input_bytes(&self) -> u64 {
        total_file_size(&self.inputs[0]) + total_file_size(&self.inputs[1])
    }
}
