use std::fmt;

use crate::coding::{decode_fixed64, put_fixed64};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Monotonic write-ordering counter. Only the low 56 bits are usable because
/// the value type is packed into the low byte of the internal key trailer.
pub type SequenceNumber = u64;

pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Number of levels in the LSM tree.
pub const NUM_LEVELS: usize = 7;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
///
/// The discriminants are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Delete = 0x00,
    /// A normal put operation.
    Put = 0x01,
}

/// The value type used when building a seek target. Since internal keys with
/// equal sequence sort by type descending, the highest tag makes the target
/// land before every entry with that sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Put;

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ValueType::Delete),
            0x01 => Some(ValueType::Put),
            _ => None,
        }
    }
}

pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Internal key: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC).
/// This ensures the newest version of a key always comes first during merging.
///
/// Encoded as `user_key ‖ fixed64((sequence << 8) | type)`.
#[derive(Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        InternalKey {
            user_key: user_key.to_vec(),
            sequence,
            value_type,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + 8);
        append_internal_key(&mut buf, &self.user_key, self.sequence, self.value_type);
        buf
    }

    pub fn decode(encoded: &[u8]) -> Option<Self> {
        let parsed = ParsedInternalKey::parse(encoded)?;
        Some(InternalKey::new(
            parsed.user_key,
            parsed.sequence,
            parsed.value_type,
        ))
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ {} : {:?}",
            escape_bytes(&self.user_key),
            self.sequence,
            self.value_type
        )
    }
}

/// Borrowed view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(encoded: &'a [u8]) -> Option<Self> {
        if encoded.len() < 8 {
            return None;
        }
        let split = encoded.len() - 8;
        let tag = decode_fixed64(&encoded[split..]);
        let value_type = ValueType::from_u8((tag & 0xff) as u8)?;
        Some(ParsedInternalKey {
            user_key: &encoded[..split],
            sequence: tag >> 8,
            value_type,
        })
    }
}

pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(sequence, value_type));
}

/// Strip the 8-byte trailer. Caller guarantees the key is a valid internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// A key used for point lookups in memtables and tables: the internal key
/// that sorts before every version of `user_key` visible at `sequence`.
pub struct LookupKey {
    internal_key: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let mut internal_key = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut internal_key, user_key, sequence, VALUE_TYPE_FOR_SEEK);
        LookupKey { internal_key }
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.internal_key
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.internal_key)
    }
}

/// Outcome of a point lookup against a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// The newest visible entry is a put.
    Found(Value),
    /// The newest visible entry is a tombstone; older sources must not be consulted.
    Deleted,
    /// This source has no visible entry for the key.
    Missing,
}

pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}
