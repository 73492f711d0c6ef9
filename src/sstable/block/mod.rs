pub mod builder;

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use crate::coding::{decode_fixed32, get_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

pub use builder::BlockBuilder;

/// A decoded data, index or meta-index block. Cheap to clone: the contents
/// are shared with the block cache.
#[derive(Clone, Debug)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn decode(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("bad block contents"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(Error::corruption("bad block contents"));
        }
        let restart_offset = data.len() - (1 + num_restarts) * 4;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Size of the block contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator {
            data: self.data.clone(),
            restarts: self.restart_offset,
            num_restarts: self.num_restarts,
            cmp,
            current: self.restart_offset,
            next_offset: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value: 0..0,
        }
    }
}

/// Bidirectional cursor over a block.
///
/// `current == restarts` means the iterator is not positioned on an entry.
pub struct BlockIterator {
    data: Bytes,
    restarts: usize,
    num_restarts: usize,
    cmp: Arc<dyn Comparator>,
    current: usize,
    next_offset: usize,
    /// Restart block containing `current`.
    restart_index: usize,
    key: Vec<u8>,
    value: Range<usize>,
}

struct EntryHeader {
    shared: usize,
    non_shared: usize,
    value_len: usize,
    /// Offset of the key delta.
    delta_offset: usize,
}

impl BlockIterator {
    fn restart_point(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.restarts + index * 4..]) as usize
    }

    fn decode_entry(&self, offset: usize) -> Option<EntryHeader> {
        if offset >= self.restarts {
            return None;
        }
        let mut input = &self.data[offset..self.restarts];
        let before = input.len();
        let shared = get_varint32(&mut input)? as usize;
        let non_shared = get_varint32(&mut input)? as usize;
        let value_len = get_varint32(&mut input)? as usize;
        if input.len() < non_shared + value_len {
            return None;
        }
        Some(EntryHeader {
            shared,
            non_shared,
            value_len,
            delta_offset: offset + before - input.len(),
        })
    }

    fn invalidate(&mut self) {
        self.current = self.restarts;
        self.next_offset = self.restarts;
        self.restart_index = self.num_restarts;
        self.key.clear();
        self.value = 0..0;
    }

    fn corrupted(&mut self) -> Error {
        self.invalidate();
        Error::corruption("bad entry in block")
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.restart_point(index);
    }

    /// Decode the entry at `next_offset`. Returns false at the end of the block.
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_offset;
        if self.current >= self.restarts {
            self.invalidate();
            return Ok(false);
        }
        let Some(entry) = self.decode_entry(self.current) else {
            return Err(self.corrupted());
        };
        if entry.shared > self.key.len() {
            return Err(self.corrupted());
        }
        self.key.truncate(entry.shared);
        let delta_end = entry.delta_offset + entry.non_shared;
        self.key
            .extend_from_slice(&self.data[entry.delta_offset..delta_end]);
        self.value = delta_end..delta_end + entry.value_len;
        self.next_offset = self.value.end;
        while self.restart_index + 1 < self.num_restarts
            && self.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }
}

impl StorageIterator for BlockIterator {
    fn is_valid(&self) -> bool {
        self.current < self.restarts
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(0);
        self.parse_next_key()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key()? && self.next_offset < self.restarts {}
        Ok(())
    }

    /// Binary search the restart array for the last restart point with a key
    /// `< target`, then scan forward.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let offset = self.restart_point(mid);
            let entry = match self.decode_entry(offset) {
                Some(entry) if entry.shared == 0 => entry,
                _ => return Err(self.corrupted()),
            };
            let key = &self.data[entry.delta_offset..entry.delta_offset + entry.non_shared];
            if self.cmp.compare(key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_key()? {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                break;
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        self.parse_next_key()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        // Back up to a restart point strictly before the current entry.
        let original = self.current;
        while self.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return Ok(());
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key()? && self.next_offset < original {}
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.data[self.value.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;

    fn build(keys: &[&str], interval: usize) -> Block {
        let mut builder = BlockBuilder::new(interval);
        for k in keys {
            builder.add(k.as_bytes(), format!("v-{k}").as_bytes());
        }
        Block::decode(Bytes::from(builder.finish())).unwrap()
    }

    #[test]
    fn restart_points_are_written() {
        let keys: Vec<String> = (0..40).map(|i| format!("key{i:03}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let block = build(&refs, 16);
        assert_eq!(block.num_restarts, 3);
    }

    #[test]
    fn prev_crosses_restart_boundaries() {
        let keys: Vec<String> = (0..10).map(|i| format!("k{i}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let block = build(&refs, 3);
        let mut it = block.iter(bytewise());
        it.seek_to_last().unwrap();
        let mut seen = Vec::new();
        while it.is_valid() {
            seen.push(String::from_utf8(it.key().to_vec()).unwrap());
            it.prev().unwrap();
        }
        let expected: Vec<String> = keys.iter().rev().cloned().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn truncated_restart_array_is_corruption() {
        let data = Bytes::from_static(&[0, 0, 0, 0, 9, 0, 0, 0]);
        assert!(Block::decode(data).is_err());
    }
}
