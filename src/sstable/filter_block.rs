use std::sync::Arc;

use bytes::Bytes;

use crate::bloom::FilterPolicy;
use crate::coding::{decode_fixed32, put_fixed32};

/// One filter is generated for every 2 KiB of data block offsets.
const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Builds the single filter block of a table.
///
/// ```text
/// [filter 0][filter 1]...[filter N-1]
/// [offset of filter 0 (4B)]...[offset of filter N-1 (4B)]
/// [offset of the offset array (4B)][base_lg (1B)]
/// ```
///
/// Filter i covers the keys of every data block whose offset falls in
/// `[i * 2KiB, (i + 1) * 2KiB)`.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened keys of the filter being accumulated.
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Called when a data block starts at `block_offset`.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset / FILTER_BASE) as usize;
        while filter_index > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(&mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        let mut result = std::mem::take(&mut self.result);
        for offset in &self.filter_offsets {
            put_fixed32(&mut result, *offset);
        }
        put_fixed32(&mut result, array_offset);
        result.push(FILTER_BASE_LG);
        result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            return;
        }
        self.starts.push(self.keys.len());
        let keys: Vec<&[u8]> = self
            .starts
            .windows(2)
            .map(|w| &self.keys[w[0]..w[1]])
            .collect();
        self.policy.create_filter(&keys, &mut self.result);
        self.keys.clear();
        self.starts.clear();
    }
}

/// Probes the filter block of an open table.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Bytes,
    /// Start of the offset array.
    offset: usize,
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Bytes) -> Self {
        let mut reader = FilterBlockReader {
            policy,
            data: Bytes::new(),
            offset: 0,
            num: 0,
            base_lg: 0,
        };
        let n = data.len();
        if n < 5 {
            return reader;
        }
        let last_word = decode_fixed32(&data[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = data[n - 1];
        reader.offset = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader.data = data;
        reader
    }

    /// False only if `key` is definitely absent from the data block at
    /// `block_offset`. Malformed filters count as a possible match.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num {
            return true;
        }
        let entry = self.offset + index * 4;
        let start = decode_fixed32(&self.data[entry..]) as usize;
        let limit = decode_fixed32(&self.data[entry + 4..]) as usize;
        if start < limit && limit <= self.offset {
            self.policy
                .key_may_match(key, &self.data[start..limit])
        } else {
            // Empty filters do not match any key.
            start != limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilterPolicy;

    #[test]
    fn empty_builder_layout() {
        let mut builder = FilterBlockBuilder::new(Arc::new(BloomFilterPolicy::new(10)));
        let block = builder.finish();
        assert_eq!(block, vec![0, 0, 0, 0, FILTER_BASE_LG]);
        let reader = FilterBlockReader::new(
            Arc::new(BloomFilterPolicy::new(10)),
            Bytes::from(block),
        );
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(100_000, b"foo"));
    }

    #[test]
    fn filters_cover_block_offset_ranges() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(BloomFilterPolicy::new(10));
        let mut builder = FilterBlockBuilder::new(policy.clone());
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.start_block(3100);
        builder.add_key(b"box");
        builder.start_block(9000);
        builder.add_key(b"hello");
        let reader = FilterBlockReader::new(policy, Bytes::from(builder.finish()));

        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(0, b"bar"));
        assert!(!reader.key_may_match(0, b"box"));
        assert!(reader.key_may_match(3100, b"box"));
        assert!(!reader.key_may_match(3100, b"foo"));
        // The 4 KiB..6 KiB range got an empty filter.
        assert!(!reader.key_may_match(4100, b"box"));
        assert!(reader.key_may_match(9000, b"hello"));
        assert!(!reader.key_may_match(9000, b"foo"));
    }
}
