use crate::coding::{put_fixed32, put_varint32};

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// Keys are prefix-compressed against the previous key. Every
/// `restart_interval` entries the full key is stored instead, and the offset
/// of that entry is recorded as a restart point so a reader can binary search
/// the block.
///
/// On-disk layout of a block:
/// ```text
/// ┌───────────────────────────────────────────────────────────────────┐
/// │ Entry 0: [shared][non_shared][value_len][key_delta][value]        │
/// │ Entry 1: ...                          (varint32 lengths)          │
/// │ Entry N: ...                                                      │
/// ├───────────────────────────────────────────────────────────────────┤
/// │ Restart array: [restart_0(4B)][restart_1(4B)]...                  │
/// │ Num restarts (4B)                                                 │
/// └───────────────────────────────────────────────────────────────────┘
/// ```
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    /// Entries emitted since the last restart.
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    /// Create a new block builder with the given restart interval.
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        BlockBuilder {
            data: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Add a key-value pair to the block.
    /// Keys MUST be added in increasing order; the table builder checks this.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.data.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.data, shared as u32);
        put_varint32(&mut self.data, non_shared as u32);
        put_varint32(&mut self.data, value.len() as u32);
        self.data.extend_from_slice(&key[shared..]);
        self.data.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
    }

    /// Finalize the block, returning its contents and resetting the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut block = std::mem::take(&mut self.data);
        for restart in &self.restarts {
            put_fixed32(&mut block, *restart);
        }
        put_fixed32(&mut block, self.restarts.len() as u32);

        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        block
    }

    /// Size of the block if it were finished now.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
