use crate::coding::{decode_fixed64, get_varint64, put_fixed64, put_varint64};
use crate::error::{Error, Result};

/// Magic number at the end of every table file.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb47_7524_8b80_fb57;

/// Compression type byte plus masked crc32c after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block within a table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Two varint64s take at most 20 bytes.
    pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode_from(input: &mut &[u8]) -> Result<Self> {
        let offset = get_varint64(input);
        let size = get_varint64(input);
        match (offset, size) {
            (Some(offset), Some(size)) => Ok(BlockHandle { offset, size }),
            _ => Err(Error::corruption("bad block handle")),
        }
    }
}

/// The footer sits at the end of the table file.
/// It tells the reader where to find the index and meta-index blocks.
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │ Meta-index block handle (varints)        │
/// │ Index block handle (varints)             │
/// │ Zero padding up to 40 bytes              │
/// │ Magic number (8B)                        │
/// └──────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        put_fixed64(&mut buf, TABLE_MAGIC_NUMBER);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LENGTH {
            return Err(Error::corruption("footer too short"));
        }
        let magic = decode_fixed64(&data[Self::ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::corruption("not an sstable (bad magic number)"));
        }
        let mut input = &data[..Self::ENCODED_LENGTH - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut input)?;
        let index_handle = BlockHandle::decode_from(&mut input)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}
