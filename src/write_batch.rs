use crate::coding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_length_prefixed_slice,
};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// Size of the sequence number and count prefix.
pub(crate) const HEADER_SIZE: usize = 12;

/// An ordered group of puts and deletes applied atomically.
///
/// The in-memory representation is the exact byte string written to the log:
///
/// ```text
/// ┌──────────────┬─────────────┬──────────────────────────────────────┐
/// │ sequence (8B)│ count (4B)  │ records...                           │
/// └──────────────┴─────────────┴──────────────────────────────────────┘
/// record := 0x01 varstring(key) varstring(value)    (put)
///         | 0x00 varstring(key)                     (delete)
/// ```
///
/// Within a batch, a later operation on the same key wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

/// A single operation decoded from a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0; HEADER_SIZE],
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Put as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Delete as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    /// Number of operations in the batch.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..])
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append every operation of `other` after the operations of `self`.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[HEADER_SIZE..]);
    }

    /// Size of the encoded batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// The encoded batch as written to the log.
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    /// Replace the contents with an encoded batch read back from the log.
    pub fn set_contents(&mut self, contents: &[u8]) -> Result<()> {
        if contents.len() < HEADER_SIZE {
            return Err(Error::corruption("malformed WriteBatch (too small)"));
        }
        self.rep.clear();
        self.rep.extend_from_slice(contents);
        Ok(())
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep)
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    /// Decode the operations in order. A malformed record yields a
    /// `Corruption` error and ends the iteration.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            input: &self.rep[HEADER_SIZE..],
            failed: false,
        }
    }

    /// Apply every operation to `mem`, the i-th one at `sequence() + i`.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut sequence = self.sequence();
        let mut found = 0u32;
        for op in self.iter() {
            match op? {
                BatchOp::Put { key, value } => mem.add(sequence, ValueType::Put, key, value),
                BatchOp::Delete { key } => mem.add(sequence, ValueType::Delete, key, &[]),
            }
            sequence += 1;
            found += 1;
        }
        if found != self.count() {
            return Err(Error::corruption("WriteBatch has wrong count"));
        }
        Ok(())
    }
}

pub struct BatchIter<'a> {
    input: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchOp<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.input.is_empty() {
            return None;
        }
        let tag = self.input[0];
        self.input = &self.input[1..];
        let op = match ValueType::from_u8(tag) {
            Some(ValueType::Put) => get_length_prefixed_slice(&mut self.input).and_then(|key| {
                get_length_prefixed_slice(&mut self.input).map(|value| BatchOp::Put { key, value })
            }),
            Some(ValueType::Delete) => {
                get_length_prefixed_slice(&mut self.input).map(|key| BatchOp::Delete { key })
            }
            None => {
                self.failed = true;
                return Some(Err(Error::corruption(format!(
                    "unknown WriteBatch tag {tag}"
                ))));
            }
        };
        match op {
            Some(op) => Some(Ok(op)),
            None => {
                self.failed = true;
                Some(Err(Error::corruption("bad WriteBatch record")))
            }
        }
    }
}
