use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

use crate::cache::TableCache;
use crate::coding::decode_fixed64;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator, TwoLevelIterator};
use crate::types::{
    InternalKey, LookupKey, LookupResult, MAX_SEQUENCE_NUMBER, NUM_LEVELS, ParsedInternalKey,
    ValueType, escape_bytes, extract_user_key,
};

/// Metadata about a live table file.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    /// Encoded smallest internal key.
    pub smallest: Vec<u8>,
    /// Encoded largest internal key.
    pub largest: Vec<u8>,
    /// Point reads that may still touch this file before it is picked for
    /// a seek compaction.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: Vec<u8>, largest: Vec<u8>) -> Self {
        // One seek costs about as much as compacting 16 KiB of data, so a
        // file earns one seek per 16 KiB, with a floor of 100.
        let allowed_seeks = (file_size / (16 * 1024)).max(100) as i64;
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }

    pub fn smallest_user_key(&self) -> &[u8] {
        extract_user_key(&self.smallest)
    }

    pub fn largest_user_key(&self) -> &[u8] {
        extract_user_key(&self.largest)
    }
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file whose largest key is `>= key`, or `files.len()`.
/// Requires `files` sorted and disjoint.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(&f.largest, key) == Ordering::Less)
}

/// The file a point read charged, when it had to consult more than one.
#[derive(Debug, Clone)]
pub struct SeekStats {
    pub file: Arc<FileMetaData>,
    pub level: usize,
}

/// An immutable snapshot of the live table files, level by level.
///
/// Level 0 files may overlap and are kept in file-number order; level 1 and
/// deeper hold disjoint files sorted by smallest key.
pub struct Version {
    pub(crate) files: Vec<Vec<Arc<FileMetaData>>>,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    /// Level that most needs compaction and its score; a score >= 1 means
    /// compaction is due.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: usize,
    /// File picked for compaction by seek charging.
    pub(crate) file_to_compact: Mutex<Option<SeekStats>>,
}

impl Version {
    pub(crate) fn new(icmp: InternalKeyComparator, table_cache: Arc<TableCache>) -> Self {
        Version {
            files: vec![Vec::new(); NUM_LEVELS],
            icmp,
            table_cache,
            compaction_score: -1.0,
            compaction_level: 0,
            file_to_compact: Mutex::new(None),
        }
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    /// Approximate byte offset of the internal key `key` across the data of
    /// this version. Opens tables through the table cache.
    pub fn approximate_offset_of(&self, key: &[u8]) -> Result<u64> {
        let mut result = 0;
        for level in 0..NUM_LEVELS {
            for f in &self.files[level] {
                if self.icmp.compare(&f.largest, key) != Ordering::Greater {
                    // Entire file is before `key`.
                    result += f.file_size;
                } else if self.icmp.compare(&f.smallest, key) == Ordering::Greater {
                    // Entire file is after `key`; deeper files in this level are too.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += self.table_cache.approximate_offset_of(f.number, f.file_size, key)?;
                }
            }
        }
        Ok(result)
    }

    /// Look `key` up in the tables of this version, newest data first.
    ///
    /// Returns the outcome and, when more than one file was read, the first
    /// file read so that it can be charged a seek.
    pub fn get(
        &self,
        key: &LookupKey,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<(LookupResult, Option<SeekStats>)> {
        let user_key = key.user_key();
        let ikey = key.internal_key();
        let ucmp = self.icmp.user_comparator();

        let mut seek_stats: Option<SeekStats> = None;
        let mut last_read: Option<SeekStats> = None;

        for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            let candidates: Vec<&Arc<FileMetaData>> = if level == 0 {
                let mut hits: Vec<&Arc<FileMetaData>> = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(user_key, f.smallest_user_key()) != Ordering::Less
                            && ucmp.compare(user_key, f.largest_user_key()) != Ordering::Greater
                    })
                    .collect();
                hits.sort_by(|a, b| b.number.cmp(&a.number));
                hits
            } else {
                let index = find_file(&self.icmp, files, ikey);
                match files.get(index) {
                    Some(f) if ucmp.compare(user_key, f.smallest_user_key()) != Ordering::Less => {
                        vec![f]
                    }
                    _ => Vec::new(),
                }
            };

            for file in candidates {
                if seek_stats.is_none() {
                    if let Some(previous) = last_read.take() {
                        seek_stats = Some(previous);
                    }
                }
                last_read = Some(SeekStats {
                    file: Arc::clone(file),
                    level,
                });

                let found = self.table_cache.get(
                    file.number,
                    file.file_size,
                    ikey,
                    verify_checksums,
                    fill_cache,
                )?;
                let Some((found_key, value)) = found else {
                    continue;
                };
                let parsed = ParsedInternalKey::parse(&found_key).ok_or_else(|| {
                    Error::corruption(format!("corrupted internal key in table {}", file.number))
                })?;
                if ucmp.compare(parsed.user_key, user_key) == Ordering::Equal {
                    let result = match parsed.value_type {
                        ValueType::Put => LookupResult::Found(value),
                        ValueType::Delete => LookupResult::Deleted,
                    };
                    return Ok((result, seek_stats));
                }
            }
        }
        Ok((LookupResult::Missing, seek_stats))
    }

    /// Charge a seek to the file in `stats`. Returns true when that makes
    /// the file due for compaction.
    pub fn update_stats(&self, stats: SeekStats) -> bool {
        let remaining = stats.file.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
        if remaining <= 0 {
            let mut pending = self.file_to_compact.lock();
            if pending.is_none() {
                *pending = Some(stats);
                return true;
            }
        }
        false
    }

    /// Whether some file in `level` overlaps the user-key range
    /// `[smallest, largest]`. `None` means unbounded on that side.
    pub fn overlap_in_level(&self, level: usize, smallest: Option<&[u8]>, largest: Option<&[u8]>) -> bool {
        let ucmp = self.icmp.user_comparator();
        let files = &self.files[level];
        let after = |f: &FileMetaData| {
            smallest.is_some_and(|s| ucmp.compare(s, f.largest_user_key()) == Ordering::Greater)
        };
        let before = |f: &FileMetaData| {
            largest.is_some_and(|l| ucmp.compare(l, f.smallest_user_key()) == Ordering::Less)
        };

        if level == 0 {
            return files.iter().any(|f| !after(f) && !before(f));
        }

        let index = match smallest {
            Some(s) => {
                // Earliest possible internal key for `s`.
                let key = LookupKey::new(s, MAX_SEQUENCE_NUMBER);
                find_file(&self.icmp, files, key.internal_key())
            }
            None => 0,
        };
        match files.get(index) {
            Some(f) => !before(f),
            None => false,
        }
    }

    /// Files in `level` overlapping the user-key range of `[begin, end]`
    /// (encoded internal keys; `None` is unbounded). In level 0 the range
    /// grows to cover every transitively overlapping file.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin: Option<Vec<u8>> = begin.map(|k| extract_user_key(k).to_vec());
        let mut user_end: Option<Vec<u8>> = end.map(|k| extract_user_key(k).to_vec());

        let mut inputs = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let f = &self.files[level][i];
            i += 1;
            let file_start = f.smallest_user_key();
            let file_limit = f.largest_user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }
            inputs.push(Arc::clone(f));
            if level == 0 {
                // Level-0 files may overlap each other. If this file widens
                // the range, restart the search with the wider range.
                if user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Level a freshly flushed memtable covering `[smallest, largest]`
    /// should be written to. Pushed below level 0 while it overlaps nothing
    /// and the grandparent overlap stays small.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest: &[u8],
        largest: &[u8],
        max_level: usize,
        max_grandparent_overlap: u64,
    ) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest), Some(largest)) {
            return level;
        }
        let start = LookupKey::new(smallest, MAX_SEQUENCE_NUMBER);
        let limit = InternalKey::new(largest, 0, ValueType::Delete).encode();
        while level < max_level {
            if self.overlap_in_level(level + 1, Some(smallest), Some(largest)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.get_overlapping_inputs(level + 2, Some(start.internal_key()), Some(&limit));
                if total_file_size(&overlaps) > max_grandparent_overlap {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Iterators over every table of this version: one per level-0 file and
    /// one concatenating iterator per non-empty deeper level.
    pub fn add_iterators(&self, verify_checksums: bool, fill_cache: bool, out: &mut Vec<BoxedIterator>) -> Result<()> {
        for file in &self.files[0] {
            out.push(self.table_cache.iter(file.number, file.file_size, verify_checksums, fill_cache)?);
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                out.push(Box::new(self.concatenating_iterator(level, verify_checksums, fill_cache)));
            }
        }
        Ok(())
    }

    pub(crate) fn concatenating_iterator(&self, level: usize, verify_checksums: bool, fill_cache: bool) -> TwoLevelIterator {
        concatenating_iterator(
            self.icmp.clone(),
            self.files[level].clone(),
            Arc::clone(&self.table_cache),
            verify_checksums,
            fill_cache,
        )
    }

    /// One line per file: `level: number:size['smallest' .. 'largest']`.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for level in 0..NUM_LEVELS {
            let _ = writeln!(out, "--- level {level} ---");
            for f in &self.files[level] {
                let _ = writeln!(
                    out,
                    " {}:{}['{}' .. '{}']",
                    f.number,
                    f.file_size,
                    escape_bytes(f.smallest_user_key()),
                    escape_bytes(f.largest_user_key()),
                );
            }
        }
        out
    }
}

/// Iterator over the tables of a sorted, disjoint file list.
pub(crate) fn concatenating_iterator(
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    verify_checksums: bool,
    fill_cache: bool,
) -> TwoLevelIterator {
    TwoLevelIterator::new(
        Box::new(LevelFileNumIterator::new(icmp, files)),
        Box::new(move |value: &[u8]| -> Result<BoxedIterator> {
            if value.len() != 16 {
                return Err(Error::corruption("file reader invoked with unexpected value"));
            }
            table_cache.iter(decode_fixed64(value), decode_fixed64(&value[8..]), verify_checksums, fill_cache)
        }),
    )
}

/// Walks a level's file list. The key is a file's largest internal key and
/// the value is `fixed64 number ‖ fixed64 size`.
pub struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    /// `files.len()` when not positioned.
    index: usize,
    value: [u8; 16],
}

impl LevelFileNumIterator {
    pub fn new(icmp: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        LevelFileNumIterator {
            icmp,
            files,
            index,
            value: [0; 16],
        }
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
        if let Some(f) = self.files.get(index) {
            self.value[..8].copy_from_slice(&f.number.to_le_bytes());
            self.value[8..].copy_from_slice(&f.file_size.to_le_bytes());
        }
    }
}

impl StorageIterator for LevelFileNumIterator {
    fn is_valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.set_index(0);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let last = self.files.len().checked_sub(1).unwrap_or(self.files.len());
        self.set_index(last);
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let index = find_file(&self.icmp, &self.files, key);
        self.set_index(index);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.set_index(self.index + 1);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let index = if self.index == 0 { self.files.len() } else { self.index - 1 };
        self.set_index(index);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.files.get(self.index).map_or(&[][..], |f| &f.largest[..])
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}
