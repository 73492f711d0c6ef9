use std::fmt;
use std::sync::Arc;

use crate::bloom::{BloomFilterPolicy, FilterPolicy};
use crate::comparator::{Comparator, bytewise};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::types::NUM_LEVELS;

/// Block compression applied to table data blocks. The discriminant is
/// written into each block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            other => Err(Error::NotSupported(format!(
                "block compression type {other}"
            ))),
        }
    }
}

/// Options controlling a database for its whole lifetime.
///
/// Defaults follow the LevelDB family; every tuning constant lives here
/// rather than being hardcoded in the engine.
#[derive(Clone)]
pub struct Options {
    /// Create the database if it is missing.
    pub create_if_missing: bool,
    /// Fail `open` if the database already exists.
    pub error_if_exists: bool,
    /// Aggressive integrity checking: corrupt WAL records fail recovery and
    /// compactions read their inputs from disk rather than the block cache.
    pub paranoid_checks: bool,
    /// Total order over user keys. Its name is persisted in the manifest.
    pub comparator: Arc<dyn Comparator>,
    /// Bytes buffered in the memtable before it is frozen and flushed. (4 MiB)
    pub write_buffer_size: usize,
    /// Open table file handles kept by the table cache. (1000)
    pub max_open_files: usize,
    /// Approximate uncompressed size of a data block. (4 KiB)
    pub block_size: usize,
    /// Entries between restart points in a block. (16)
    pub block_restart_interval: usize,
    /// Target size of a table produced by compaction. (2 MiB)
    pub max_file_size: usize,
    pub compression: CompressionType,
    /// Capacity of the block cache in bytes; 0 disables it. (8 MiB)
    pub cache_size: usize,
    /// Bloom filter bits per key; `None` writes tables without a filter. (10)
    pub bloom_bits_per_key: Option<usize>,
    /// Level-0 file count that triggers a compaction. (4)
    pub level0_compaction_trigger: usize,
    /// Level-0 file count at which each write is delayed by 1ms. (8)
    pub level0_slowdown_writes_trigger: usize,
    /// Level-0 file count at which writes wait for compaction. (12)
    pub level0_stop_writes_trigger: usize,
    /// Size budget of level 1. (10 MiB)
    pub max_bytes_for_level_base: u64,
    /// Growth factor of the size budget between adjacent levels. (10)
    pub level_size_multiplier: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            comparator: bytewise(),
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024,
            compression: CompressionType::Snappy,
            cache_size: 8 * 1024 * 1024,
            bloom_bits_per_key: Some(10),
            level0_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 8,
            level0_stop_writes_trigger: 12,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            level_size_multiplier: 10,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("comparator", &self.comparator.name())
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_file_size", &self.max_file_size)
            .field("compression", &self.compression)
            .field("cache_size", &self.cache_size)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Clip tunables into sane ranges and reject values that cannot be fixed up.
    pub fn sanitize(mut self) -> Result<Self> {
        if self.block_restart_interval == 0 {
            return Err(Error::invalid_argument("block_restart_interval must be positive"));
        }
        if self.level_size_multiplier < 2 {
            return Err(Error::invalid_argument("level_size_multiplier must be at least 2"));
        }
        if self.level0_compaction_trigger == 0 {
            return Err(Error::invalid_argument("level0_compaction_trigger must be positive"));
        }
        if self.level0_slowdown_writes_trigger < self.level0_compaction_trigger
            || self.level0_stop_writes_trigger < self.level0_slowdown_writes_trigger
        {
            return Err(Error::invalid_argument(
                "level0 triggers must satisfy compaction <= slowdown <= stop",
            ));
        }
        if self.bloom_bits_per_key == Some(0) {
            self.bloom_bits_per_key = None;
        }

        self.max_open_files = self.max_open_files.clamp(64 + 10, 50_000);
        self.write_buffer_size = self.write_buffer_size.clamp(64 << 10, 1 << 30);
        self.max_file_size = self.max_file_size.clamp(1 << 20, 1 << 30);
        self.block_size = self.block_size.clamp(1 << 10, 4 << 20);
        self.max_bytes_for_level_base = self.max_bytes_for_level_base.max(1 << 20);
        Ok(self)
    }

    pub fn filter_policy(&self) -> Option<Arc<dyn FilterPolicy>> {
        self.bloom_bits_per_key
            .map(|bits| Arc::new(BloomFilterPolicy::new(bits)) as Arc<dyn FilterPolicy>)
    }

    /// Maximum bytes for `level` before it needs compaction. Level 0 is
    /// governed by file count instead.
    pub fn max_bytes_for_level(&self, level: usize) -> f64 {
        let mut result = self.max_bytes_for_level_base as f64;
        let mut level = level;
        while level > 1 {
            result *= self.level_size_multiplier as f64;
            level -= 1;
        }
        result
    }

    pub(crate) fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.max_file_size as u64
    }

    pub(crate) fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.max_file_size as u64
    }

    /// Highest level a memtable flush may be pushed to when it overlaps nothing.
    pub(crate) fn max_mem_compact_level(&self) -> usize {
        2.min(NUM_LEVELS - 1)
    }
}

/// Options for a single read or iterator.
#[derive(Clone)]
pub struct ReadOptions {
    /// Re-read blocks from disk instead of trusting the block cache. Blocks
    /// are always checksummed when they are read from disk.
    pub verify_checksums: bool,
    /// Store blocks read for this operation in the block cache.
    pub fill_cache: bool,
    /// Read as of this snapshot instead of the latest committed state.
    pub snapshot: Option<Snapshot>,
    /// Inclusive lower bound for iterators.
    pub lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound for iterators.
    pub upper_bound: Option<Vec<u8>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
            lower_bound: None,
            upper_bound: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    pub fn with_bounds(mut self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Self {
        self.lower_bound = lower.map(<[u8]>::to_vec);
        self.upper_bound = upper.map(<[u8]>::to_vec);
        self
    }

    /// Restrict iteration to keys starting with `prefix`. Assumes the
    /// bytewise comparator. A prefix of only `0xff` bytes has no finite
    /// successor, so only the lower bound is set in that case.
    pub fn with_prefix(mut self, prefix: &[u8]) -> Self {
        self.lower_bound = Some(prefix.to_vec());
        self.upper_bound = prefix_successor(prefix);
        self
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("verify_checksums", &self.verify_checksums)
            .field("fill_cache", &self.fill_cache)
            .field("snapshot", &self.snapshot.as_ref().map(Snapshot::sequence))
            .field("lower_bound", &self.lower_bound)
            .field("upper_bound", &self.upper_bound)
            .finish()
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let pos = prefix.iter().rposition(|&b| b != 0xff)?;
    let mut upper = prefix[..=pos].to_vec();
    upper[pos] += 1;
    Some(upper)
}

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the log before the write is acknowledged.
    pub sync: bool,
}

impl WriteOptions {
    pub fn sync() -> Self {
        WriteOptions { sync: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_successor_cases() {
        assert_eq!(prefix_successor(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_successor(&[b'a', 0xff]), Some(b"b".to_vec()));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn sanitize_clips_and_rejects() {
        let opts = Options {
            write_buffer_size: 1,
            max_open_files: 1,
            ..Options::default()
        }
        .sanitize()
        .unwrap();
        assert_eq!(opts.write_buffer_size, 64 << 10);
        assert_eq!(opts.max_open_files, 74);

        let bad = Options {
            block_restart_interval: 0,
            ..Options::default()
        };
        assert!(bad.sanitize().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn level_budgets_grow_geometrically() {
        let opts = Options::default();
        assert_eq!(opts.max_bytes_for_level(1), 10.0 * 1048576.0);
        assert_eq!(opts.max_bytes_for_level(2), 100.0 * 1048576.0);
        assert_eq!(opts.max_bytes_for_level(3), 1000.0 * 1048576.0);
    }
}
