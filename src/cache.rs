//! Caches in front of the table files: a byte-charged block cache shared by
//! all tables, and a bounded cache of open table handles.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::filename::{sst_table_file_name, table_file_name};
use crate::iterator::BoxedIterator;
use crate::sstable::block::Block;
use crate::sstable::{SSTable, TableOptions};

const NUM_SHARD_BITS: u32 = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

/// Blocks are keyed by the owning table's cache id and the block offset.
type BlockKey = (u64, u64);

struct Shard {
    lru: LruCache<BlockKey, Block>,
    usage: usize,
    capacity: usize,
}

impl Shard {
    fn insert(&mut self, key: BlockKey, block: Block) {
        self.usage += block.size();
        if let Some(old) = self.lru.put(key, block) {
            self.usage -= old.size();
        }
        while self.usage > self.capacity {
            match self.lru.pop_lru() {
                Some((_, evicted)) => self.usage -= evicted.size(),
                None => break,
            }
        }
    }
}

/// Sharded LRU cache of uncompressed blocks, charged by block size.
///
/// Each shard holds `capacity / 16` bytes; the shard for a key is chosen by
/// its xxh3 hash so hot tables spread across locks.
pub struct BlockCache {
    shards: Vec<Mutex<Shard>>,
    next_id: AtomicU64,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(NUM_SHARDS);
        let shards = (0..NUM_SHARDS)
            .map(|_| {
                Mutex::new(Shard {
                    lru: LruCache::unbounded(),
                    usage: 0,
                    capacity: per_shard,
                })
            })
            .collect();
        BlockCache {
            shards,
            next_id: AtomicU64::new(1),
        }
    }

    /// A fresh id for a newly opened table, so blocks of a reused file
    /// number never alias.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn shard(&self, key: &BlockKey) -> &Mutex<Shard> {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&key.0.to_le_bytes());
        buf[8..].copy_from_slice(&key.1.to_le_bytes());
        let hash = xxh3_64(&buf);
        &self.shards[(hash >> (64 - NUM_SHARD_BITS)) as usize]
    }

    pub fn get(&self, cache_id: u64, offset: u64) -> Option<Block> {
        let key = (cache_id, offset);
        self.shard(&key).lock().lru.get(&key).cloned()
    }

    pub fn insert(&self, cache_id: u64, offset: u64, block: Block) {
        let key = (cache_id, offset);
        self.shard(&key).lock().insert(key, block);
    }

    /// Bytes currently charged against the cache.
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|s| s.lock().usage).sum()
    }
}

/// Keeps up to `capacity` tables open, keyed by file number.
pub struct TableCache {
    dir: PathBuf,
    options: TableOptions,
    tables: Mutex<LruCache<u64, Arc<SSTable>>>,
}

impl TableCache {
    pub fn new(dir: &Path, options: TableOptions, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        TableCache {
            dir: dir.to_path_buf(),
            options,
            tables: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Open table `file_number`, or return the cached handle.
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<SSTable>> {
        if let Some(table) = self.tables.lock().get(&file_number) {
            return Ok(Arc::clone(table));
        }

        let path = table_file_name(&self.dir, file_number);
        let table = match SSTable::open(&path, file_size, self.options.clone()) {
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let legacy = sst_table_file_name(&self.dir, file_number);
                SSTable::open(&legacy, file_size, self.options.clone())?
            }
            other => other?,
        };
        let table = Arc::new(table);
        debug!(file_number, file_size, "opened table");
        self.tables.lock().put(file_number, Arc::clone(&table));
        Ok(table)
    }

    /// Iterator over every entry of a table.
    pub fn iter(
        &self,
        file_number: u64,
        file_size: u64,
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<BoxedIterator> {
        let table = self.find_table(file_number, file_size)?;
        Ok(Box::new(table.iter(verify_checksums, fill_cache)))
    }

    /// Point lookup of an internal key. Returns the first entry `>= key`
    /// in the table, if any could match.
    pub fn get(
        &self,
        file_number: u64,
        file_size: u64,
        key: &[u8],
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.find_table(file_number, file_size)?;
        table.internal_get(key, verify_checksums, fill_cache)
    }

    pub fn approximate_offset_of(&self, file_number: u64, file_size: u64, key: &[u8]) -> Result<u64> {
        let table = self.find_table(file_number, file_size)?;
        table.approximate_offset_of(key)
    }

    /// Drop the handle of a deleted file.
    pub fn evict(&self, file_number: u64) {
        self.tables.lock().pop(&file_number);
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn block_of(size: usize) -> Block {
        let mut data = vec![0u8; size];
        let n = data.len();
        // Zero restarts.
        data[n - 4..].copy_from_slice(&0u32.to_le_bytes());
        Block::decode(Bytes::from(data)).unwrap()
    }

    #[test]
    fn charge_bounded_by_capacity() {
        let cache = BlockCache::new(16 * 1024);
        let id = cache.new_id();
        for offset in 0..200 {
            cache.insert(id, offset, block_of(512));
        }
        assert!(cache.total_charge() <= 16 * 1024);
        assert!(cache.get(id, 199).is_some());
    }

    #[test]
    fn ids_are_distinct() {
        let cache = BlockCache::new(1024);
        assert_ne!(cache.new_id(), cache.new_id());
    }
}
