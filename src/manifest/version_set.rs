use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::cache::TableCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::compaction::Compaction;
use crate::error::{Error, Result};
use crate::filename::{descriptor_file_name, read_current_file, set_current_file};
use crate::iterator::{BoxedIterator, MergeIterator};
use crate::manifest::edit::VersionEdit;
use crate::manifest::version::{FileMetaData, Version, concatenating_iterator, total_file_size};
use crate::options::Options;
use crate::types::{InternalKey, NUM_LEVELS, SequenceNumber, extract_user_key};
use crate::wal::{LogReader, LogWriter};

/// Accumulates the file additions and deletions of a series of edits on top
/// of a base version.
struct VersionBuilder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    deleted: Vec<HashSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl VersionBuilder {
    fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Self {
        VersionBuilder {
            icmp,
            base,
            deleted: vec![HashSet::new(); NUM_LEVELS],
            added: vec![Vec::new(); NUM_LEVELS],
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointers: &mut [Vec<u8>]) {
        for (level, key) in &edit.compact_pointers {
            compact_pointers[*level] = key.encode();
        }
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, file) in &edit.new_files {
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(Arc::new(FileMetaData::new(
                file.number,
                file.file_size,
                file.smallest.encode(),
                file.largest.encode(),
            )));
        }
    }

    fn save_to(self, table_cache: Arc<TableCache>) -> Result<Version> {
        let mut v = Version::new(self.icmp.clone(), table_cache);
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            if level == 0 {
                files.sort_by_key(|f| f.number);
            } else {
                files.sort_by(|a, b| {
                    self.icmp
                        .compare(&a.smallest, &b.smallest)
                        .then(a.number.cmp(&b.number))
                });
                for pair in files.windows(2) {
                    if self.icmp.compare(&pair[0].largest, &pair[1].smallest) != Ordering::Less {
                        return Err(Error::corruption(format!(
                            "overlapping ranges in level {level}: files {} and {}",
                            pair[0].number, pair[1].number
                        )));
                    }
                }
            }
            v.files[level] = files;
        }
        Ok(v)
    }
}

/// The chain of versions plus the engine counters persisted in the manifest.
///
/// Lives under the database metadata lock.
pub struct VersionSet {
    dir: PathBuf,
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    prev_log_number: u64,
    descriptor_log: Option<LogWriter>,
    current: Arc<Version>,
    /// Every version handed out, to find the files still referenced.
    versions: Vec<Weak<Version>>,
    /// Per level, the encoded key where the next size compaction starts.
    compact_pointers: Vec<Vec<u8>>,
}

impl VersionSet {
    pub fn new(dir: &Path, options: Arc<Options>, table_cache: Arc<TableCache>) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let current = Arc::new(Version::new(icmp.clone(), Arc::clone(&table_cache)));
        VersionSet {
            dir: dir.to_path_buf(),
            options,
            icmp,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            versions: vec![Arc::downgrade(&current)],
            current,
            compact_pointers: vec![Vec::new(); NUM_LEVELS],
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Give back a number from `new_file_number` that was never used.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current.level_bytes(level)
    }

    /// Apply `edit` to the current version, persist it to the manifest and
    /// install the result as the new current version.
    ///
    /// The first call after recovery starts a fresh manifest holding a full
    /// snapshot of the current state, then points CURRENT at it.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => {
                debug_assert!(n >= self.log_number);
                debug_assert!(n < self.next_file_number);
            }
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut builder = VersionBuilder::new(self.icmp.clone(), self.current());
        let mut compact_pointers = self.compact_pointers.clone();
        builder.apply(edit, &mut compact_pointers);
        let mut version = builder.save_to(Arc::clone(&self.table_cache))?;
        self.finalize(&mut version);

        let mut new_manifest = None;
        if self.descriptor_log.is_none() {
            let path = descriptor_file_name(&self.dir, self.manifest_file_number);
            let mut log = LogWriter::create(&path)?;
            if let Err(e) = self.write_snapshot(&mut log) {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            self.descriptor_log = Some(log);
            new_manifest = Some(path);
        }

        let written = match self.descriptor_log.as_mut() {
            Some(log) => log.add_record(&edit.encode()).and_then(|()| log.sync()),
            None => Err(Error::corruption("manifest writer missing")),
        };
        let written = written.and_then(|()| match &new_manifest {
            Some(_) => set_current_file(&self.dir, self.manifest_file_number),
            None => Ok(()),
        });
        if let Err(e) = written {
            warn!(error = %e, "manifest write failed");
            if let Some(path) = new_manifest {
                self.descriptor_log = None;
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        self.compact_pointers = compact_pointers;
        self.append_version(version);
        self.log_number = edit.log_number.unwrap_or(self.log_number);
        self.prev_log_number = edit.prev_log_number.unwrap_or(self.prev_log_number);
        Ok(())
    }

    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.versions.retain(|w| w.strong_count() > 0);
        self.versions.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Rebuild the current version from the manifest named by CURRENT.
    pub fn recover(&mut self) -> Result<()> {
        let manifest_name = read_current_file(&self.dir)?;
        let manifest_path = self.dir.join(&manifest_name);
        let reader = LogReader::open(&manifest_path, true).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => Error::corruption(format!(
                "CURRENT points to a non-existent file {manifest_name}"
            )),
            other => other,
        })?;

        let mut builder = VersionBuilder::new(self.icmp.clone(), self.current());
        let mut compact_pointers = self.compact_pointers.clone();
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file = None;
        let mut last_sequence = None;
        let mut records = 0usize;

        for record in reader {
            let edit = VersionEdit::decode(&record?)?;
            if let Some(name) = &edit.comparator {
                let ours = self.icmp.user_comparator().name();
                if name != ours {
                    return Err(Error::invalid_argument(format!(
                        "{name} does not match existing comparator {ours}"
                    )));
                }
            }
            builder.apply(&edit, &mut compact_pointers);
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file = edit.next_file_number.or(next_file);
            last_sequence = edit.last_sequence.or(last_sequence);
            records += 1;
        }

        let next_file =
            next_file.ok_or_else(|| Error::corruption("no meta-nextfile entry in descriptor"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("no meta-lognumber entry in descriptor"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Error::corruption("no last-sequence-number entry in descriptor"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save_to(Arc::clone(&self.table_cache))?;
        self.finalize(&mut version);
        self.append_version(version);
        self.compact_pointers = compact_pointers;
        self.manifest_file_number = next_file;
        self.next_file_number = next_file + 1;
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;
        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);

        info!(
            manifest = %manifest_name,
            records,
            next_file,
            last_sequence,
            log_number,
            "recovered manifest"
        );
        Ok(())
    }

    /// Allocate the number of the manifest a brand-new database starts with
    /// and write its first edit.
    pub fn create_new(&mut self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let manifest_number = 1;
        let path = descriptor_file_name(&self.dir, manifest_number);
        let result = (|| -> Result<()> {
            let mut log = LogWriter::create(&path)?;
            log.add_record(&edit.encode())?;
            log.sync()?;
            set_current_file(&self.dir, manifest_number)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&path);
        }
        result
    }

    fn write_snapshot(&self, log: &mut LogWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, key) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = InternalKey::decode(key) {
                edit.set_compact_pointer(level, key);
            }
        }
        for level in 0..NUM_LEVELS {
            for f in self.current.files(level) {
                let smallest = InternalKey::decode(&f.smallest)
                    .ok_or_else(|| Error::corruption("bad smallest key in version"))?;
                let largest = InternalKey::decode(&f.largest)
                    .ok_or_else(|| Error::corruption("bad largest key in version"))?;
                edit.add_file(level, f.number, f.file_size, smallest, largest);
            }
        }
        log.add_record(&edit.encode())
    }

    /// Compute the level most in need of compaction.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0;
        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                // Level 0 is bounded by file count: every file is read on
                // lookup, and small write buffers would otherwise make for
                // many tiny level-0 compactions.
                version.num_files(0) as f64 / self.options.level0_compaction_trigger as f64
            } else {
                version.level_bytes(level) as f64 / self.options.max_bytes_for_level(level)
            };
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0 || self.current.file_to_compact.lock().is_some()
    }

    /// Numbers of every table referenced by a live version.
    pub fn live_files(&mut self) -> BTreeSet<u64> {
        self.versions.retain(|w| w.strong_count() > 0);
        let mut live = BTreeSet::new();
        for version in self.versions.iter().filter_map(Weak::upgrade) {
            for level in 0..NUM_LEVELS {
                live.extend(version.files(level).iter().map(|f| f.number));
            }
        }
        live
    }

    /// Pick the next size or seek compaction, if any is due.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current();
        let size_compaction = current.compaction_score >= 1.0;
        let seek_file = current.file_to_compact.lock().clone();

        let mut c;
        if size_compaction {
            let level = current.compaction_level;
            c = self.new_compaction(level, Arc::clone(&current));
            let pointer = &self.compact_pointers[level];
            let first = current
                .files(level)
                .iter()
                .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, pointer) == Ordering::Greater)
                .or_else(|| current.files(level).first())?;
            c.inputs[0].push(Arc::clone(first));
        } else if let Some(seek) = seek_file {
            c = self.new_compaction(seek.level, Arc::clone(&current));
            c.inputs[0].push(seek.file);
        } else {
            return None;
        }

        if c.level == 0 {
            // Level-0 files overlap each other, so pick up every file
            // overlapping the chosen one.
            let (smallest, largest) = self.get_range(&c.inputs[0]);
            c.inputs[0] = current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
            debug_assert!(!c.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// A manual compaction of `level` over `[begin, end]` (encoded internal
    /// keys; `None` is unbounded).
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Compaction> {
        let current = self.current();
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }
        // Avoid compacting too much in one shot. Level 0 files overlap, so
        // dropping some of them could resurrect older data.
        if level > 0 {
            let limit = self.options.max_file_size as u64;
            let mut total = 0;
            for i in 0..inputs.len() {
                total += inputs[i].file_size;
                if total >= limit {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }
        let mut c = self.new_compaction(level, current);
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    fn new_compaction(&self, level: usize, version: Arc<Version>) -> Compaction {
        Compaction::new(
            level,
            version,
            self.icmp.clone(),
            self.options.max_file_size as u64,
            self.options.max_grandparent_overlap_bytes(),
        )
    }

    fn setup_other_inputs(&mut self, c: &mut Compaction) {
        let level = c.level;
        let current = Arc::clone(&c.input_version);

        self.add_boundary_inputs(&current, level, &mut c.inputs[0]);
        let (smallest, mut largest) = self.get_range(&c.inputs[0]);

        c.inputs[1] = current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        self.add_boundary_inputs(&current, level + 1, &mut c.inputs[1]);

        let (mut all_start, mut all_limit) = self.get_range2(&c.inputs[0], &c.inputs[1]);

        // Grow the level inputs if that doesn't change the set of
        // level + 1 files.
        if !c.inputs[1].is_empty() {
            let mut expanded0 = current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            self.add_boundary_inputs(&current, level, &mut expanded0);
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size < self.options.expanded_compaction_byte_size_limit()
            {
                let (new_start, new_limit) = self.get_range(&expanded0);
                let mut expanded1 =
                    current.get_overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                self.add_boundary_inputs(&current, level + 1, &mut expanded1);
                if expanded1.len() == c.inputs[1].len() {
                    debug!(
                        level,
                        from0 = c.inputs[0].len(),
                        from1 = c.inputs[1].len(),
                        to0 = expanded0.len(),
                        to1 = expanded1.len(),
                        "expanding compaction inputs"
                    );
                    largest = new_limit;
                    c.inputs[0] = expanded0;
                    c.inputs[1] = expanded1;
                    (all_start, all_limit) = self.get_range2(&c.inputs[0], &c.inputs[1]);
                }
            }
        }

        if level + 2 < NUM_LEVELS {
            c.grandparents = current.get_overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }

        // Update the place where the next compaction of this level starts,
        // now rather than when the edit is applied, so a failed compaction
        // tries a different key range next time.
        if let Some(key) = InternalKey::decode(&largest) {
            c.edit.set_compact_pointer(level, key);
        }
        self.compact_pointers[level] = largest;
    }

    /// Extend `files` with every file of `level` whose smallest user key
    /// equals the largest user key of the inputs. Otherwise a newer version
    /// of that key would move down a level while an older one stayed above.
    fn add_boundary_inputs(&self, version: &Version, level: usize, files: &mut Vec<Arc<FileMetaData>>) {
        if files.is_empty() || level == 0 || level >= NUM_LEVELS {
            return;
        }
        let ucmp = self.icmp.user_comparator();
        let Some(mut largest) = files
            .iter()
            .max_by(|a, b| self.icmp.compare(&a.largest, &b.largest))
            .map(|f| f.largest.clone())
        else {
            return;
        };
        loop {
            let boundary = version
                .files(level)
                .iter()
                .filter(|f| {
                    self.icmp.compare(&f.smallest, &largest) == Ordering::Greater
                        && ucmp.compare(f.smallest_user_key(), extract_user_key(&largest))
                            == Ordering::Equal
                })
                .min_by(|a, b| self.icmp.compare(&a.smallest, &b.smallest));
            match boundary {
                Some(f) => {
                    largest = f.largest.clone();
                    files.push(Arc::clone(f));
                }
                None => break,
            }
        }
    }

    /// Smallest and largest encoded keys over `files`. Requires non-empty input.
    fn get_range(&self, files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
        let mut smallest: &[u8] = &[];
        let mut largest: &[u8] = &[];
        for (i, f) in files.iter().enumerate() {
            if i == 0 {
                smallest = &f.smallest;
                largest = &f.largest;
            } else {
                if self.icmp.compare(&f.smallest, smallest) == Ordering::Less {
                    smallest = &f.smallest;
                }
                if self.icmp.compare(&f.largest, largest) == Ordering::Greater {
                    largest = &f.largest;
                }
            }
        }
        (smallest.to_vec(), largest.to_vec())
    }

    fn get_range2(&self, a: &[Arc<FileMetaData>], b: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
        let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
        self.get_range(&all)
    }

    /// Merged iterator over every input of `c`.
    pub fn make_input_iterator(&self, c: &Compaction) -> Result<BoxedIterator> {
        let verify = self.options.paranoid_checks;
        let mut children: Vec<BoxedIterator> = Vec::new();
        for which in 0..2 {
            if c.inputs[which].is_empty() {
                continue;
            }
            if c.level + which == 0 {
                for f in &c.inputs[which] {
                    children.push(self.table_cache.iter(f.number, f.file_size, verify, false)?);
                }
            } else {
                children.push(Box::new(concatenating_iterator(
                    self.icmp.clone(),
                    c.inputs[which].clone(),
                    Arc::clone(&self.table_cache),
                    verify,
                    false,
                )));
            }
        }
        Ok(Box::new(MergeIterator::new(
            Arc::new(self.icmp.clone()),
            children,
        )))
    }

    /// `files[ n0 n1 n2 n3 n4 n5 n6 ]`
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = (0..NUM_LEVELS)
            .map(|level| self.current.num_files(level).to_string())
            .collect();
        format!("files[ {} ]", counts.join(" "))
    }
}
