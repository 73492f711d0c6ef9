//! The database: write path, read path, recovery and the public handle.
//!
//! ```text
//!  put/delete/write ──► WAL (<n>.log) ──► memtable ──(full)──► immutable memtable
//!                                                                    │ background flush
//!                                                                    ▼
//!  get/iter ◄── memtable, immutable memtable, level 0 … level 6 tables (<n>.ldb)
//! ```
//!
//! Two locks: the writer slot serializes commits (and owns the WAL writer),
//! and the state lock guards everything readers and the background thread
//! share. Readers hold the state lock only long enough to clone `Arc`s.

mod compact;
mod iter;
mod lock;

use std::collections::BTreeSet;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::bloom::{FilterPolicy, InternalFilterPolicy};
use crate::cache::{BlockCache, TableCache};
use crate::comparator::InternalKeyComparator;
use crate::compaction::BackgroundWorker;
use crate::error::{Error, Result};
use crate::filename::{
    FileType, current_file_name, lock_file_name, log_file_name, parse_file_name,
};
use crate::iterator::{BoxedIterator, MergeIterator};
use crate::manifest::{VersionEdit, VersionSet};
use crate::memtable::MemTable;
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::sstable::TableOptions;
use crate::types::{
    InternalKey, LookupKey, LookupResult, MAX_SEQUENCE_NUMBER, NUM_LEVELS, SequenceNumber,
    VALUE_TYPE_FOR_SEEK, Value, ValueType,
};
use crate::wal::{LogReader, LogWriter};
use crate::write_batch::WriteBatch;

pub use iter::{DBIterator, Entries};
use lock::DbLock;

/// File handles the table cache leaves for logs, the manifest and the lock.
const NUM_NON_TABLE_CACHE_FILES: usize = 10;

/// Pause after a failed background flush or compaction before retrying.
const BACKGROUND_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Cumulative compaction work per output level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    fn add(&mut self, micros: u64, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }
}

/// Shape of one level plus the compaction work that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub files: usize,
    pub bytes: u64,
    pub compaction: CompactionStats,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub levels: Vec<LevelStats>,
    pub memtable_bytes: usize,
    pub immutable_memtable: bool,
    pub last_sequence: SequenceNumber,
    pub live_snapshots: usize,
    pub background_errors: u64,
}

/// A caller-requested compaction of one level over a key range.
struct ManualCompaction {
    level: usize,
    /// Encoded internal keys; `None` is unbounded.
    begin: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    done: bool,
    /// Why the compaction stopped early; handed back to the caller.
    error: Option<Error>,
}

/// Guarded by the writer slot.
struct WriterState {
    log: LogWriter,
}

/// Guarded by the state lock.
struct DbState {
    mem: Arc<MemTable>,
    imm: Option<Arc<MemTable>>,
    /// Number of the log backing `mem`.
    log_number: u64,
    versions: VersionSet,
    /// Table numbers being written that no version references yet.
    pending_outputs: BTreeSet<u64>,
    bg_scheduled: bool,
    /// A size or seek compaction is running.
    bg_compacting: bool,
    /// Latched by a failed WAL sync. Fails every later write.
    bg_error: Option<Error>,
    background_errors: u64,
    paused: bool,
    manual: Option<ManualCompaction>,
    stats: [CompactionStats; NUM_LEVELS],
}

pub(crate) struct DbInner {
    dir: PathBuf,
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    block_cache: Option<Arc<BlockCache>>,
    snapshots: Arc<SnapshotList>,
    writer: Mutex<WriterState>,
    state: Mutex<DbState>,
    /// Signalled whenever background work finishes a step.
    bg_cv: Condvar,
    /// Set while an immutable memtable waits for its flush, so a long
    /// compaction can flush it without taking the state lock per key.
    has_imm: AtomicBool,
    shutting_down: AtomicBool,
    worker: Mutex<Option<BackgroundWorker>>,
    _lock: DbLock,
}

/// An open database. All methods take `&self`; the handle can be shared
/// between threads.
pub struct DB {
    inner: Arc<DbInner>,
}

fn table_options(options: &Options, block_cache: Option<Arc<BlockCache>>) -> TableOptions {
    let mut table = TableOptions::new(Arc::new(InternalKeyComparator::new(Arc::clone(
        &options.comparator,
    ))));
    table.filter_policy = options
        .filter_policy()
        .map(|policy| Arc::new(InternalFilterPolicy::new(policy)) as Arc<dyn FilterPolicy>);
    table.block_size = options.block_size;
    table.block_restart_interval = options.block_restart_interval;
    table.compression = options.compression;
    table.block_cache = block_cache;
    table
}

impl DB {
    /// Open the database in `path`, creating it if allowed, and replay any
    /// logs left by the previous run.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<DB> {
        let dir = path.as_ref().to_path_buf();
        let options = Arc::new(options.sanitize()?);

        if options.create_if_missing {
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(Error::invalid_argument(format!(
                "{}: does not exist (create_if_missing is false)",
                dir.display()
            )));
        }
        let db_lock = DbLock::acquire(&lock_file_name(&dir))?;
        debug!(lock = %db_lock.path().display(), "acquired database lock");

        let block_cache = (options.cache_size > 0).then(|| Arc::new(BlockCache::new(options.cache_size)));
        let table_cache = Arc::new(TableCache::new(
            &dir,
            table_options(&options, block_cache.clone()),
            options.max_open_files - NUM_NON_TABLE_CACHE_FILES,
        ));
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let mut versions = VersionSet::new(&dir, Arc::clone(&options), Arc::clone(&table_cache));

        if !current_file_name(&dir).exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    dir.display()
                )));
            }
            info!(path = %dir.display(), "creating new database");
            versions.create_new()?;
        } else if options.error_if_exists {
            return Err(Error::invalid_argument(format!(
                "{}: exists (error_if_exists is true)",
                dir.display()
            )));
        }

        versions.recover()?;
        let mut edit = VersionEdit::new();
        recover_logs(&dir, &options, &icmp, &table_cache, &mut versions, &mut edit)?;

        let log_number = versions.new_file_number();
        let log = LogWriter::create(&log_file_name(&dir, log_number))?;
        edit.set_log_number(log_number);
        edit.set_prev_log_number(0);
        versions.log_and_apply(&mut edit)?;

        let mem = Arc::new(MemTable::new(icmp.clone(), options.write_buffer_size));
        let inner = Arc::new(DbInner {
            dir,
            options,
            icmp,
            table_cache,
            block_cache,
            snapshots: SnapshotList::new(),
            writer: Mutex::new(WriterState { log }),
            state: Mutex::new(DbState {
                mem,
                imm: None,
                log_number,
                versions,
                pending_outputs: BTreeSet::new(),
                bg_scheduled: false,
                bg_compacting: false,
                bg_error: None,
                background_errors: 0,
                paused: false,
                manual: None,
                stats: [CompactionStats::default(); NUM_LEVELS],
            }),
            bg_cv: Condvar::new(),
            has_imm: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            worker: Mutex::new(None),
            _lock: db_lock,
        });

        let weak: Weak<DbInner> = Arc::downgrade(&inner);
        let worker = BackgroundWorker::spawn("lsm-kv-bg", move || {
            if let Some(inner) = weak.upgrade() {
                inner.background_call();
            }
        })?;
        *inner.worker.lock() = Some(worker);

        {
            let mut state = inner.state.lock();
            inner.delete_obsolete_files(&mut state);
            inner.maybe_schedule_compaction(&mut state);
            info!(
                path = %inner.dir.display(),
                last_sequence = state.versions.last_sequence(),
                log_number,
                files = %state.versions.level_summary(),
                "database opened"
            );
        }
        Ok(DB { inner })
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply every operation of `batch` atomically.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.write(options, Some(batch))
    }

    /// Value of `key` as of the read snapshot, `None` if absent or deleted.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Value>> {
        self.inner.get(options, key)
    }

    /// A cursor over the database as of the read snapshot. Starts
    /// unpositioned.
    pub fn iter(&self, options: &ReadOptions) -> Result<DBIterator> {
        self.inner.new_iterator(options)
    }

    /// Pin the current state for later reads.
    pub fn get_snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        self.inner.snapshots.acquire(state.versions.last_sequence())
    }

    /// Unpin a snapshot. Equivalent to dropping it; clones still pin the
    /// sequence until they are dropped too.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Write the current memtable to a table and wait until it is installed.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush_memtable()
    }

    /// Compact every level overlapping the user-key range `[begin, end]`
    /// (`None` is unbounded) down to the deepest level holding data in it.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.compact_range(begin, end)
    }

    /// Stop starting size and seek compactions until resumed. Waits for a
    /// running compaction to finish. Memtable flushes continue.
    pub fn pause_background_work(&self) {
        let mut state = self.inner.state.lock();
        state.paused = true;
        while state.bg_compacting {
            self.inner.bg_cv.wait(&mut state);
        }
    }

    pub fn resume_background_work(&self) {
        let mut state = self.inner.state.lock();
        state.paused = false;
        self.inner.maybe_schedule_compaction(&mut state);
    }

    /// Engine introspection in the LevelDB property namespace:
    /// `leveldb.num-files-at-level<N>`, `leveldb.stats`, `leveldb.sstables`,
    /// `leveldb.approximate-memory-usage`.
    pub fn get_property(&self, name: &str) -> Option<String> {
        self.inner.get_property(name)
    }

    /// Approximate bytes on disk used by each user-key range `[start, limit)`.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Result<Vec<u64>> {
        // Table reads happen without the state lock.
        let version = self.inner.state.lock().versions.current();
        ranges
            .iter()
            .map(|(start, limit)| {
                let start = InternalKey::new(start, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).encode();
                let limit = InternalKey::new(limit, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).encode();
                let start = version.approximate_offset_of(&start)?;
                let limit = version.approximate_offset_of(&limit)?;
                Ok(limit.saturating_sub(start))
            })
            .collect()
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats()
    }

    /// Stop background work and release the database. Logs are synced;
    /// the memtable is recovered from them on the next open.
    pub fn close(self) -> Result<()> {
        self.inner.shutdown()
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.inner.shutdown() {
            warn!(error = %e, "error closing database");
        }
    }
}

/// Replay every log not yet reflected in the manifest into level-0 tables.
fn recover_logs(
    dir: &Path,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &Arc<TableCache>,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<()> {
    let min_log = versions.log_number();
    let prev_log = versions.prev_log_number();
    let mut expected = versions.live_files();
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
            continue;
        };
        expected.remove(&number);
        if file_type == FileType::Log && (number >= min_log || number == prev_log) {
            logs.push(number);
        }
    }
    if let Some(missing) = expected.first() {
        return Err(Error::corruption(format!(
            "{} missing files; e.g.: {}",
            expected.len(),
            crate::filename::table_file_name(dir, *missing).display()
        )));
    }

    logs.sort_unstable();
    let mut max_sequence = 0;
    for number in logs {
        let sequence = replay_log(dir, number, options, icmp, table_cache, versions, edit)?;
        max_sequence = max_sequence.max(sequence);
        versions.mark_file_number_used(number);
    }
    if versions.last_sequence() < max_sequence {
        versions.set_last_sequence(max_sequence);
    }
    Ok(())
}

/// Replay one log. Returns the highest sequence number it contained.
fn replay_log(
    dir: &Path,
    number: u64,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &Arc<TableCache>,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<SequenceNumber> {
    let path = log_file_name(dir, number);
    let reader = LogReader::open(&path, options.paranoid_checks)?;
    let mut mem: Option<Arc<MemTable>> = None;
    let mut max_sequence = 0;
    let mut records = 0usize;
    let mut tables = 0usize;

    for record in reader {
        let record = record?;
        let mut batch = WriteBatch::new();
        let applied = batch.set_contents(&record).and_then(|()| {
            let table = mem.get_or_insert_with(|| Arc::new(MemTable::new(icmp.clone(), options.write_buffer_size)));
            batch.insert_into(table)
        });
        if let Err(e) = applied {
            if options.paranoid_checks {
                return Err(e);
            }
            warn!(log = number, error = %e, "ignoring bad log record");
            continue;
        }
        records += 1;
        let last = batch.sequence() + u64::from(batch.count()).saturating_sub(1);
        max_sequence = max_sequence.max(last);

        if mem
            .as_ref()
            .is_some_and(|m| m.is_full())
        {
            if let Some(full) = mem.take() {
                write_recovered_table(dir, table_cache, versions, edit, &full)?;
                tables += 1;
            }
        }
    }
    if let Some(rest) = mem.filter(|m| !m.is_empty()) {
        write_recovered_table(dir, table_cache, versions, edit, &rest)?;
        tables += 1;
    }
    info!(log = number, records, tables, max_sequence, "replayed log");
    Ok(max_sequence)
}

fn write_recovered_table(
    dir: &Path,
    table_cache: &Arc<TableCache>,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
    mem: &Arc<MemTable>,
) -> Result<()> {
    let number = versions.new_file_number();
    if let Some(file) = compact::build_table(dir, table_cache, Box::new(mem.iter()), number)? {
        edit.add_file(0, file.number, file.file_size, file.smallest, file.largest);
    }
    Ok(())
}

impl DbInner {
    fn write(&self, options: &WriteOptions, batch: Option<WriteBatch>) -> Result<()> {
        let mut writer = self.writer.lock();
        let mut state = self.state.lock();
        self.make_room_for_write(&mut state, &mut writer, batch.is_none())?;
        let Some(mut batch) = batch else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }
        let sequence = state.versions.last_sequence() + 1;
        let mem = Arc::clone(&state.mem);
        drop(state);

        batch.set_sequence(sequence);
        let last_sequence = sequence + u64::from(batch.count()) - 1;
        writer.log.add_record(batch.data())?;
        if options.sync {
            if let Err(e) = writer.log.sync() {
                warn!(error = %e, "log sync failed; failing further writes");
                let mut state = self.state.lock();
                state.bg_error = Some(e.duplicate());
                self.bg_cv.notify_all();
                return Err(e);
            }
        }
        batch.insert_into(&mem)?;

        self.state.lock().versions.set_last_sequence(last_sequence);
        Ok(())
    }

    /// Make sure the memtable has room for a write, switching to a fresh
    /// memtable and log when it is full (or `force` is set). Delays or
    /// blocks the writer while level 0 is overloaded.
    fn make_room_for_write(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        writer: &mut WriterState,
        mut force: bool,
    ) -> Result<()> {
        let mut allow_delay = !force;
        loop {
            if let Some(e) = &state.bg_error {
                return Err(e.duplicate());
            }
            let level0 = state.versions.num_level_files(0);
            if allow_delay && level0 >= self.options.level0_slowdown_writes_trigger {
                // Hand the background thread some CPU instead of stalling
                // one write for seconds once the stop trigger is hit.
                MutexGuard::unlocked(state, || std::thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
            } else if !force && !state.mem.is_full() {
                return Ok(());
            } else if force && state.mem.is_empty() {
                return Ok(());
            } else if state.imm.is_some() {
                info!("memtable full; waiting for flush");
                self.maybe_schedule_compaction(state);
                self.bg_cv.wait(state);
            } else if level0 >= self.options.level0_stop_writes_trigger {
                info!(level0, "too many level-0 files; waiting");
                self.maybe_schedule_compaction(state);
                self.bg_cv.wait(state);
            } else {
                let number = state.versions.new_file_number();
                let log = match LogWriter::create(&log_file_name(&self.dir, number)) {
                    Ok(log) => log,
                    Err(e) => {
                        state.versions.reuse_file_number(number);
                        return Err(e);
                    }
                };
                writer.log = log;
                let previous_log = mem::replace(&mut state.log_number, number);
                let fresh = Arc::new(MemTable::new(self.icmp.clone(), self.options.write_buffer_size));
                let full = mem::replace(&mut state.mem, fresh);
                info!(
                    previous_log,
                    log = number,
                    entries = full.len(),
                    bytes = full.approximate_memory_usage(),
                    "switched to new memtable"
                );
                state.imm = Some(full);
                self.has_imm.store(true, AtomicOrdering::Release);
                force = false;
                self.maybe_schedule_compaction(state);
            }
        }
    }

    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Value>> {
        let (mem, imm, version, sequence) = {
            let state = self.state.lock();
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                sequence,
            )
        };

        let lookup = LookupKey::new(key, sequence);
        for table in std::iter::once(&mem).chain(imm.as_ref()) {
            match table.get(&lookup) {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::Missing => {}
            }
        }

        let verify = options.verify_checksums;
        let (result, seek_stats) = version.get(&lookup, verify, options.fill_cache)?;
        if let Some(stats) = seek_stats {
            if version.update_stats(stats) {
                let mut state = self.state.lock();
                self.maybe_schedule_compaction(&mut state);
            }
        }
        Ok(match result {
            LookupResult::Found(value) => Some(value),
            LookupResult::Deleted | LookupResult::Missing => None,
        })
    }

    fn new_iterator(&self, options: &ReadOptions) -> Result<DBIterator> {
        let (mem, imm, version, sequence) = {
            let state = self.state.lock();
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                sequence,
            )
        };

        let mut children: Vec<BoxedIterator> = vec![Box::new(mem.iter())];
        if let Some(imm) = &imm {
            children.push(Box::new(imm.iter()));
        }
        let verify = options.verify_checksums;
        version.add_iterators(verify, options.fill_cache, &mut children)?;
        let merged = MergeIterator::new(Arc::new(self.icmp.clone()), children);
        Ok(DBIterator::new(
            Box::new(merged),
            Arc::clone(&self.options.comparator),
            sequence,
            options.lower_bound.clone(),
            options.upper_bound.clone(),
            version,
        ))
    }

    fn flush_memtable(&self) -> Result<()> {
        self.write(&WriteOptions::default(), None)?;
        let mut state = self.state.lock();
        while state.imm.is_some() {
            if let Some(e) = &state.bg_error {
                return Err(e.duplicate());
            }
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(shutting_down_error());
            }
            self.bg_cv.wait(&mut state);
        }
        Ok(())
    }

    fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let state = self.state.lock();
            let version = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| version.overlap_in_level(level, begin, end))
                .max()
                .unwrap_or(1)
        };
        self.flush_memtable()?;
        for level in 0..max_level_with_files {
            self.run_manual_compaction(level, begin, end)?;
        }
        Ok(())
    }

    fn run_manual_compaction(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let begin = begin.map(|k| InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).encode());
        let end = end.map(|k| InternalKey::new(k, 0, ValueType::Delete).encode());

        let mut state = self.state.lock();
        while state.manual.is_some() {
            self.bg_cv.wait(&mut state);
        }
        state.manual = Some(ManualCompaction {
            level,
            begin,
            end,
            done: false,
            error: None,
        });
        let result = loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                break Err(shutting_down_error());
            }
            match state.manual.as_mut() {
                None => break Ok(()),
                Some(manual) if manual.done => break manual.error.take().map_or(Ok(()), Err),
                Some(_) => {}
            }
            self.maybe_schedule_compaction(&mut state);
            self.bg_cv.wait(&mut state);
        };
        state.manual = None;
        self.bg_cv.notify_all();
        result
    }

    /// Queue background work if any is due and none is queued.
    fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.bg_scheduled || self.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }
        let due = state.imm.is_some()
            || state.manual.as_ref().is_some_and(|m| !m.done)
            || (!state.paused && state.versions.needs_compaction());
        if !due {
            return;
        }
        let scheduled = match self.worker.lock().as_ref() {
            Some(worker) => worker.schedule().is_ok(),
            None => false,
        };
        state.bg_scheduled = scheduled;
    }

    fn get_property(&self, name: &str) -> Option<String> {
        let property = name.strip_prefix("leveldb.")?;
        let state = self.state.lock();
        if let Some(level) = property.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            return (level < NUM_LEVELS).then(|| state.versions.num_level_files(level).to_string());
        }
        match property {
            "stats" => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for (level, stats) in state.stats.iter().enumerate() {
                    let files = state.versions.num_level_files(level);
                    if files == 0 && stats.micros == 0 {
                        continue;
                    }
                    out.push_str(&format!(
                        "{:>3} {:>8} {:>8.0} {:>9.0} {:>8.0} {:>9.0}\n",
                        level,
                        files,
                        state.versions.num_level_bytes(level) as f64 / 1_048_576.0,
                        stats.micros as f64 / 1e6,
                        stats.bytes_read as f64 / 1_048_576.0,
                        stats.bytes_written as f64 / 1_048_576.0,
                    ));
                }
                Some(out)
            }
            "sstables" => Some(state.versions.current().debug_string()),
            "approximate-memory-usage" => {
                let mut total = state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_memory_usage();
                }
                if let Some(cache) = &self.block_cache {
                    total += cache.total_charge();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    fn stats(&self) -> Stats {
        let state = self.state.lock();
        let levels = (0..NUM_LEVELS)
            .map(|level| LevelStats {
                files: state.versions.num_level_files(level),
                bytes: state.versions.num_level_bytes(level),
                compaction: state.stats[level],
            })
            .collect();
        Stats {
            levels,
            memtable_bytes: state.mem.approximate_memory_usage(),
            immutable_memtable: state.imm.is_some(),
            last_sequence: state.versions.last_sequence(),
            live_snapshots: self.snapshots.len(),
            background_errors: state.background_errors,
        }
    }

    fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if self.shutting_down.swap(true, AtomicOrdering::AcqRel) {
                return Ok(());
            }
            while state.bg_scheduled {
                self.bg_cv.wait(&mut state);
            }
            self.bg_cv.notify_all();
        }
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.shutdown();
        }
        let synced = self.writer.lock().log.sync();
        info!(path = %self.dir.display(), "database closed");
        synced
    }
}

fn shutting_down_error() -> Error {
    Error::Io(std::io::Error::other("database is shutting down"))
}

/// Delete every file of the database in `path`, then the directory itself
/// if nothing else is left in it.
pub fn destroy_db(path: impl AsRef<Path>, _options: &Options) -> Result<()> {
    let dir = path.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let lock_path = lock_file_name(dir);
    let db_lock = DbLock::acquire(&lock_path)?;

    let mut result = Ok(());
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some((_, file_type)) = name.to_str().and_then(parse_file_name) else {
            continue;
        };
        if file_type == FileType::DbLock {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()) {
            if result.is_ok() {
                result = Err(e.into());
            }
        }
    }
    drop(db_lock);
    let _ = fs::remove_file(&lock_path);
    let _ = fs::remove_dir(dir);
    info!(path = %dir.display(), "destroyed database");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::Comparator;

    fn small_options() -> Options {
        Options {
            create_if_missing: true,
            write_buffer_size: 64 * 1024,
            ..Options::default()
        }
    }

    #[test]
    fn table_options_wrap_the_user_filter() {
        let options = Options::default();
        let table = table_options(&options, None);
        let policy = table.filter_policy.unwrap();
        assert_eq!(policy.name(), "leveldb.BuiltinBloomFilter2");
        assert_eq!(table.comparator.name(), "leveldb.InternalKeyComparator");
    }

    #[test]
    fn forced_room_switches_only_a_non_empty_memtable() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path(), small_options()).unwrap();

        db.inner.flush_memtable().unwrap();
        assert_eq!(db.stats().levels[0].files, 0);

        db.put(&WriteOptions::default(), b"k", b"v").unwrap();
        db.inner.flush_memtable().unwrap();
        let files: usize = db.stats().levels.iter().map(|l| l.files).sum();
        assert_eq!(files, 1);
        assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn unknown_property_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path(), small_options()).unwrap();
        assert!(db.get_property("leveldb.no-such-thing").is_none());
        assert!(db.get_property("rocksdb.stats").is_none());
        assert!(db.get_property("leveldb.num-files-at-level9").is_none());
        assert_eq!(db.get_property("leveldb.num-files-at-level0").as_deref(), Some("0"));
    }
}
