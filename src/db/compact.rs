//! Background work: memtable flushes, compactions and removal of files no
//! version needs any more.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Instant;

use parking_lot::MutexGuard;
use tracing::{debug, error, info, warn};

use super::{BACKGROUND_ERROR_BACKOFF, DbInner, DbState, shutting_down_error};
use crate::cache::TableCache;
use crate::compaction::Compaction;
use crate::error::{Error, Result};
use crate::filename::{FileType, parse_file_name, table_file_name};
use crate::iterator::BoxedIterator;
use crate::manifest::{NewFile, VersionEdit};
use crate::sstable::SSTableBuilder;
use crate::types::{InternalKey, MAX_SEQUENCE_NUMBER, ParsedInternalKey, ValueType};

/// Write every entry of `iter` into table `number`. Returns `None` (and
/// leaves no file behind) when the iterator is empty.
pub(super) fn build_table(
    dir: &Path,
    table_cache: &TableCache,
    mut iter: BoxedIterator,
    number: u64,
) -> Result<Option<NewFile>> {
    let path = table_file_name(dir, number);
    iter.seek_to_first()?;
    if !iter.is_valid() {
        return Ok(None);
    }

    let result = (|| -> Result<NewFile> {
        let mut builder = SSTableBuilder::create(&path, table_cache.options().clone())?;
        let smallest = iter.key().to_vec();
        let mut largest = Vec::new();
        while iter.is_valid() {
            builder.add(iter.key(), iter.value())?;
            largest.clear();
            largest.extend_from_slice(iter.key());
            iter.next()?;
        }
        let file_size = builder.finish()?;
        // Make sure the table is readable before it goes into a version.
        table_cache.find_table(number, file_size)?;
        Ok(NewFile {
            number,
            file_size,
            smallest: decode_bound(&smallest)?,
            largest: decode_bound(&largest)?,
        })
    })();

    match result {
        Ok(file) => Ok(Some(file)),
        Err(e) => {
            table_cache.evict(number);
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

fn decode_bound(key: &[u8]) -> Result<InternalKey> {
    InternalKey::decode(key).ok_or_else(|| Error::corruption("table bound is not an internal key"))
}

/// A table being written by a compaction.
struct CompactionOutput {
    number: u64,
    builder: Option<SSTableBuilder>,
    smallest: Vec<u8>,
    largest: Vec<u8>,
    file_size: u64,
}

impl DbInner {
    /// Entry point of the background thread.
    pub(super) fn background_call(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.bg_scheduled);
        if !self.shutting_down.load(AtomicOrdering::Acquire) {
            if let Err(e) = self.background_compaction(&mut state) {
                state.background_errors += 1;
                // A failed manual compaction is reported to its caller instead.
                let manual_failed = state.manual.as_ref().is_some_and(|m| m.error.is_some());
                if !manual_failed && !self.shutting_down.load(AtomicOrdering::Acquire) {
                    error!(error = %e, "background work failed; retrying after back-off");
                    MutexGuard::unlocked(&mut state, || std::thread::sleep(BACKGROUND_ERROR_BACKOFF));
                }
            }
        }
        state.bg_scheduled = false;
        // The last step may have produced more work, e.g. too many files
        // in a level.
        self.maybe_schedule_compaction(&mut state);
        self.bg_cv.notify_all();
    }

    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        if state.imm.is_some() {
            return self.compact_memtable(state);
        }

        let st: &mut DbState = state;
        let (compaction, is_manual) = match st.manual.as_mut().filter(|m| !m.done) {
            Some(manual) => {
                let c = st
                    .versions
                    .compact_range(manual.level, manual.begin.as_deref(), manual.end.as_deref());
                match &c {
                    None => manual.done = true,
                    Some(c) => {
                        // Level 1+ inputs may have been cut short; resume
                        // after the last one on the next round.
                        manual.begin = c.inputs[0].last().map(|f| f.largest.clone());
                    }
                }
                (c, true)
            }
            None if !st.paused => (st.versions.pick_compaction(), false),
            None => (None, false),
        };
        let Some(mut c) = compaction else {
            return Ok(());
        };

        state.bg_compacting = !is_manual;
        let result = if !is_manual && c.is_trivial_move() {
            self.move_file(state, &mut c)
        } else {
            self.run_compaction(state, &mut c)
        };
        state.bg_compacting = false;

        if let Err(e) = &result {
            if let Some(manual) = state.manual.as_mut().filter(|_| is_manual) {
                warn!(error = %e, "manual compaction failed");
                manual.done = true;
                manual.error = Some(e.duplicate());
            }
        }
        self.delete_obsolete_files(state);
        result
    }

    /// Relink a single file one level down.
    fn move_file(&self, state: &mut MutexGuard<'_, DbState>, c: &mut Compaction) -> Result<()> {
        let f = Arc::clone(&c.inputs[0][0]);
        c.edit.delete_file(c.level, f.number);
        c.edit.add_file(
            c.level + 1,
            f.number,
            f.file_size,
            decode_bound(&f.smallest)?,
            decode_bound(&f.largest)?,
        );
        state.versions.log_and_apply(&mut c.edit)?;
        info!(
            file = f.number,
            bytes = f.file_size,
            to_level = c.level + 1,
            files = %state.versions.level_summary(),
            "moved table"
        );
        Ok(())
    }

    /// Write the immutable memtable to a table and install it.
    pub(super) fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(imm) = state.imm.clone() else {
            return Ok(());
        };
        let base = state.versions.current();
        let started = Instant::now();

        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        let built = MutexGuard::unlocked(state, || {
            build_table(&self.dir, &self.table_cache, Box::new(imm.iter()), number)
        });
        state.pending_outputs.remove(&number);
        let built = built?;

        let mut edit = VersionEdit::new();
        let mut level = 0;
        let mut bytes = 0;
        if let Some(file) = built {
            level = base.pick_level_for_memtable_output(
                &file.smallest.user_key,
                &file.largest.user_key,
                self.options.max_mem_compact_level(),
                self.options.max_grandparent_overlap_bytes(),
            );
            bytes = file.file_size;
            edit.add_file(level, file.number, file.file_size, file.smallest, file.largest);
        }
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(shutting_down_error());
        }

        // Logs older than the one backing the live memtable are now obsolete.
        edit.set_prev_log_number(0);
        edit.set_log_number(state.log_number);
        state.versions.log_and_apply(&mut edit)?;

        let micros = started.elapsed().as_micros() as u64;
        state.stats[level].add(micros, 0, bytes);
        state.imm = None;
        self.has_imm.store(false, AtomicOrdering::Release);
        info!(
            file = number,
            bytes,
            level,
            entries = imm.len(),
            micros,
            "flushed memtable"
        );
        self.delete_obsolete_files(state);
        self.bg_cv.notify_all();
        Ok(())
    }

    fn run_compaction(&self, state: &mut MutexGuard<'_, DbState>, c: &mut Compaction) -> Result<()> {
        let started = Instant::now();
        info!(
            level = c.level,
            inputs = c.num_input_files(0),
            next_level_inputs = c.num_input_files(1),
            bytes = c.input_bytes(),
            "compacting"
        );

        let smallest_snapshot = self
            .snapshots
            .oldest()
            .unwrap_or_else(|| state.versions.last_sequence());
        let input = state.versions.make_input_iterator(c)?;

        let mut outputs: Vec<CompactionOutput> = Vec::new();
        let merged = MutexGuard::unlocked(state, || {
            self.merge_inputs(c, input, smallest_snapshot, &mut outputs)
        });

        let result = merged.and_then(|()| {
            c.add_input_deletions();
            for out in &outputs {
                c.edit.add_file(
                    c.level + 1,
                    out.number,
                    out.file_size,
                    decode_bound(&out.smallest)?,
                    decode_bound(&out.largest)?,
                );
            }
            state.versions.log_and_apply(&mut c.edit)
        });
        for out in &outputs {
            state.pending_outputs.remove(&out.number);
        }
        result?;

        let bytes_written: u64 = outputs.iter().map(|o| o.file_size).sum();
        let micros = started.elapsed().as_micros() as u64;
        state.stats[c.level + 1].add(micros, c.input_bytes(), bytes_written);
        info!(
            level = c.level,
            outputs = outputs.len(),
            bytes_written,
            micros,
            files = %state.versions.level_summary(),
            "compacted"
        );
        Ok(())
    }

    /// Merge the compaction inputs into new tables, dropping entries no
    /// reader can observe. Runs without the state lock.
    fn merge_inputs(
        &self,
        c: &mut Compaction,
        mut input: BoxedIterator,
        smallest_snapshot: u64,
        outputs: &mut Vec<CompactionOutput>,
    ) -> Result<()> {
        let ucmp = Arc::clone(&self.options.comparator);
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        input.seek_to_first()?;
        while input.is_valid() {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(shutting_down_error());
            }
            if self.has_imm.load(AtomicOrdering::Acquire) {
                let mut state = self.state.lock();
                self.compact_memtable(&mut state)?;
            }

            let key = input.key();
            if c.should_stop_before(key) && outputs.last().is_some_and(|o| o.builder.is_some()) {
                self.finish_output(outputs)?;
            }

            let mut drop = false;
            match ParsedInternalKey::parse(key) {
                None => {
                    // Keep unparsable keys so the damage stays visible.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Some(ikey) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .is_none_or(|k| ucmp.compare(ikey.user_key, k) != Ordering::Equal);
                    if first_occurrence {
                        current_user_key = Some(ikey.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }
                    if last_sequence_for_key <= smallest_snapshot {
                        // Shadowed by a newer entry that every snapshot sees.
                        drop = true;
                    } else if ikey.value_type == ValueType::Delete
                        && ikey.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(ikey.user_key)
                    {
                        // Nothing older is left to hide, and newer entries
                        // of this key at lower sequence would already have
                        // been dropped by the rule above.
                        drop = true;
                    }
                    last_sequence_for_key = ikey.sequence;
                }
            }

            if !drop {
                if outputs.last().is_none_or(|o| o.builder.is_none()) {
                    outputs.push(self.open_output()?);
                }
                if let Some(out) = outputs.last_mut() {
                    if out.smallest.is_empty() {
                        out.smallest = key.to_vec();
                    }
                    out.largest.clear();
                    out.largest.extend_from_slice(key);
                    if let Some(builder) = out.builder.as_mut() {
                        builder.add(key, input.value())?;
                        if builder.file_size() >= c.max_output_file_size() {
                            self.finish_output(outputs)?;
                        }
                    }
                }
            }
            input.next()?;
        }
        if outputs.last().is_some_and(|o| o.builder.is_some()) {
            self.finish_output(outputs)?;
        }
        Ok(())
    }

    fn open_output(&self) -> Result<CompactionOutput> {
        let number = {
            let mut state = self.state.lock();
            let number = state.versions.new_file_number();
            state.pending_outputs.insert(number);
            number
        };
        let builder = SSTableBuilder::create(
            &table_file_name(&self.dir, number),
            self.table_cache.options().clone(),
        )?;
        Ok(CompactionOutput {
            number,
            builder: Some(builder),
            smallest: Vec::new(),
            largest: Vec::new(),
            file_size: 0,
        })
    }

    fn finish_output(&self, outputs: &mut [CompactionOutput]) -> Result<()> {
        let Some(out) = outputs.last_mut() else {
            return Ok(());
        };
        let Some(builder) = out.builder.take() else {
            return Ok(());
        };
        let entries = builder.num_entries();
        out.file_size = builder.finish()?;
        self.table_cache.find_table(out.number, out.file_size)?;
        debug!(file = out.number, entries, bytes = out.file_size, "finished compaction output");
        Ok(())
    }

    /// Remove files that no live version references and that are not
    /// being written.
    pub(super) fn delete_obsolete_files(&self, state: &mut DbState) {
        if state.bg_error.is_some() {
            // After a failed sync it is unclear whether new state made it
            // to disk; keep everything.
            return;
        }
        let mut live = state.versions.live_files();
        live.extend(state.pending_outputs.iter().copied());
        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot list database directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Descriptor => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::DbLock | FileType::InfoLog => true,
            };
            if keep {
                continue;
            }
            if file_type == FileType::Table {
                self.table_cache.evict(number);
            }
            debug!(file = ?name, "deleting obsolete file");
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(file = ?name, error = %e, "cannot delete obsolete file");
            }
        }
    }
}
