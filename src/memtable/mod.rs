pub mod skiplist;

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::comparator::InternalKeyComparator;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{
    LookupKey, LookupResult, ParsedInternalKey, SequenceNumber, ValueType, append_internal_key,
};
use skiplist::SkipList;

/// In-memory sorted buffer for writes. Wraps a SkipList keyed by internal key.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Entries are never modified: an overwrite or delete is a new internal key
/// with a higher sequence number. Deletes are tombstones because older
/// versions may exist in SSTables on disk.
///
/// A single writer inserts under the write lock while readers take short
/// read locks; iterators re-acquire the lock per step and hold only a node
/// index between steps.
pub struct MemTable {
    data: RwLock<SkipList>,
    cmp: InternalKeyComparator,
    size_limit: usize,
}

impl MemTable {
    /// Create an empty memtable that reports full past `size_limit` bytes.
    pub fn new(cmp: InternalKeyComparator, size_limit: usize) -> Self {
        let list = SkipList::with_comparator(Arc::new(cmp.clone()));
        MemTable {
            data: RwLock::new(list),
            cmp,
            size_limit,
        }
    }

    /// Record a put or a tombstone for `user_key` at `sequence`.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let mut key = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut key, user_key, sequence, value_type);
        self.data.write().insert(key, value.to_vec());
    }

    /// Newest entry for the lookup key's user key at or below its sequence.
    pub fn get(&self, key: &LookupKey) -> LookupResult {
        let list = self.data.read();
        let Some(idx) = list.find_greater_or_equal(key.internal_key()) else {
            return LookupResult::Missing;
        };
        let (found_key, value) = list.entry(idx);
        let Some(parsed) = ParsedInternalKey::parse(found_key) else {
            return LookupResult::Missing;
        };
        if self.cmp.compare_user_keys(parsed.user_key, key.user_key()) != Ordering::Equal {
            return LookupResult::Missing;
        }
        match parsed.value_type {
            ValueType::Put => LookupResult::Found(value.to_vec()),
            ValueType::Delete => LookupResult::Deleted,
        }
    }

    /// Current memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.data.read().size_bytes()
    }

    /// Past the flush threshold: the memtable should be frozen.
    pub fn is_full(&self) -> bool {
        self.approximate_memory_usage() > self.size_limit
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Iterator over internal keys, including tombstones. Starts unpositioned.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            node: None,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }
}

/// Cursor over a shared memtable. Keeps the table alive for its lifetime.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    node: Option<usize>,
    key: Bytes,
    value: Bytes,
}

impl MemTableIterator {
    fn load(&mut self, list: &SkipList, node: Option<usize>) {
        self.node = node;
        match node {
            Some(idx) => {
                let (key, value) = list.entry(idx);
                self.key = key.clone();
                self.value = value.clone();
            }
            None => {
                self.key = Bytes::new();
                self.value = Bytes::new();
            }
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.load(&list, list.first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.load(&list, list.find_last());
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.load(&list, list.find_greater_or_equal(key));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        let next = self.node.and_then(|idx| list.next_of(idx));
        self.load(&list, next);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        let prev = match self.node {
            Some(_) => list.find_less_than(&self.key),
            None => None,
        };
        self.load(&list, prev);
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}
