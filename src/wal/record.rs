use crate::checksum;

/// Logs are written in blocks of this size. A record never starts within the
/// last `HEADER_SIZE - 1` bytes of a block; that tail is zero-filled.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Fragment header:
///
/// ```text
/// ┌────────────────┬─────────────┬──────────┬──────────────────┐
/// │ masked CRC (4B)│ Length (2B) │ Type (1B)│ Payload (Length) │
/// └────────────────┴─────────────┴──────────┴──────────────────┘
/// ```
///
/// The CRC covers the type byte and the payload.
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Position of a fragment within its logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Reserved for preallocated files.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Fragment type for a piece of a record.
    pub(crate) fn for_fragment(is_first: bool, is_last: bool) -> Self {
        match (is_first, is_last) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}

/// Encode a fragment header for `payload`.
pub(crate) fn encode_header(record_type: RecordType, payload: &[u8]) -> [u8; HEADER_SIZE] {
    debug_assert!(payload.len() <= 0xffff);
    let crc = checksum::mask(fragment_crc(record_type as u8, payload));
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&crc.to_le_bytes());
    header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    header[6] = record_type as u8;
    header
}

pub(crate) fn fragment_crc(type_byte: u8, payload: &[u8]) -> u32 {
    checksum::value_of(&[&[type_byte], payload])
}
