use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::checksum;
use crate::coding::decode_fixed32;
use crate::comparator::bytewise;
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, StorageIterator, TwoLevelIterator};
use crate::options::CompressionType;
use crate::sstable::TableOptions;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, BlockHandle, Footer};

/// An opened SSTable file. Supports point lookups and bidirectional scans.
///
/// On open:
/// 1. Read footer (last 48 bytes) → find index and meta-index block positions
/// 2. Read the index block
/// 3. Read the filter block named in the meta-index, if the policy matches
/// 4. Ready for queries (data blocks read on demand, through the block cache)
///
/// Reads use positional I/O, so one handle serves concurrent readers.
pub struct SSTable {
    inner: Arc<TableInner>,
}

impl fmt::Debug for SSTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.inner.path)
            .field("cache_id", &self.inner.cache_id)
            .finish()
    }
}

struct TableInner {
    /// Path to the SSTable file (for error messages).
    path: PathBuf,
    file: File,
    options: TableOptions,
    /// Blocks of this table are cached under this id.
    cache_id: u64,
    index_block: Block,
    filter: Option<FilterBlockReader>,
    metaindex_handle: BlockHandle,
}

impl SSTable {
    pub fn open(path: &Path, file_size: u64, options: TableOptions) -> Result<Self> {
        let file = File::open(path)?;
        if file_size < Footer::ENCODED_LENGTH as u64 {
            return Err(Error::corruption(format!(
                "{}: file is too short to be an sstable",
                path.display()
            )));
        }

        let mut footer_buf = [0u8; Footer::ENCODED_LENGTH];
        read_at(&file, file_size - Footer::ENCODED_LENGTH as u64, &mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_block = Block::decode(read_block(&file, &footer.index_handle)?)?;
        let cache_id = options.block_cache.as_ref().map_or(0, |c| c.new_id());

        let mut inner = TableInner {
            path: path.to_path_buf(),
            file,
            options,
            cache_id,
            index_block,
            filter: None,
            metaindex_handle: footer.metaindex_handle,
        };
        // A missing or unreadable filter only costs lookups, so errors are dropped.
        inner.filter = inner.read_filter(&footer).ok().flatten();
        Ok(SSTable {
            inner: Arc::new(inner),
        })
    }

    /// First entry with key `>= key` in the data block that could hold `key`,
    /// or `None` when the filter rules `key` out.
    pub fn internal_get(
        &self,
        key: &[u8],
        verify_checksums: bool,
        fill_cache: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let inner = &self.inner;
        let mut index_iter = inner.index_block.iter(Arc::clone(&inner.options.comparator));
        index_iter.seek(key)?;
        if !index_iter.is_valid() {
            return Ok(None);
        }
        let mut input = index_iter.value();
        let handle = BlockHandle::decode_from(&mut input)?;
        if let Some(filter) = &inner.filter {
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }
        let mut block_iter = inner.block_iter(&handle, verify_checksums, fill_cache)?;
        block_iter.seek(key)?;
        if block_iter.is_valid() {
            return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
        }
        Ok(None)
    }

    /// Iterator over every entry, starting unpositioned.
    pub fn iter(&self, verify_checksums: bool, fill_cache: bool) -> TwoLevelIterator {
        let inner = Arc::clone(&self.inner);
        let index_iter = Box::new(inner.index_block.iter(Arc::clone(&inner.options.comparator)));
        TwoLevelIterator::new(
            index_iter,
            Box::new(move |mut value: &[u8]| -> Result<BoxedIterator> {
                let handle = BlockHandle::decode_from(&mut value)?;
                Ok(Box::new(inner.block_iter(&handle, verify_checksums, fill_cache)?))
            }),
        )
    }

    /// Approximate file offset where data for `key` begins. Keys past the
    /// last block map to the start of the meta-index, near the end of file.
    pub fn approximate_offset_of(&self, key: &[u8]) -> Result<u64> {
        let inner = &self.inner;
        let mut index_iter = inner.index_block.iter(Arc::clone(&inner.options.comparator));
        index_iter.seek(key)?;
        if index_iter.is_valid() {
            let mut input = index_iter.value();
            if let Ok(handle) = BlockHandle::decode_from(&mut input) {
                return Ok(handle.offset);
            }
        }
        Ok(inner.metaindex_handle.offset)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn has_filter(&self) -> bool {
        self.inner.filter.is_some()
    }
}

impl TableInner {
    fn read_filter(&self, footer: &Footer) -> Result<Option<FilterBlockReader>> {
        let Some(policy) = self.options.filter_policy.clone() else {
            return Ok(None);
        };
        let metaindex = Block::decode(read_block(&self.file, &footer.metaindex_handle)?)?;
        let key = format!("filter.{}", policy.name());
        let mut iter = metaindex.iter(bytewise());
        iter.seek(key.as_bytes())?;
        if !iter.is_valid() || iter.key() != key.as_bytes() {
            return Ok(None);
        }
        let mut input = iter.value();
        let handle = BlockHandle::decode_from(&mut input)?;
        let contents = read_block(&self.file, &handle)?;
        Ok(Some(FilterBlockReader::new(policy, contents)))
    }

    /// Data block at `handle`. With `verify_checksums` a cached copy is not
    /// trusted and the block is read back from disk.
    fn block_iter(&self, handle: &BlockHandle, verify_checksums: bool, fill_cache: bool) -> Result<BlockIterator> {
        let cached = match &self.options.block_cache {
            Some(cache) if !verify_checksums => cache.get(self.cache_id, handle.offset),
            _ => None,
        };
        let block = match cached {
            Some(block) => block,
            None => {
                let block = Block::decode(read_block(&self.file, handle)?)?;
                if let Some(cache) = self.options.block_cache.as_ref().filter(|_| fill_cache) {
                    cache.insert(self.cache_id, handle.offset, block.clone());
                }
                block
            }
        };
        Ok(block.iter(Arc::clone(&self.options.comparator)))
    }
}

/// Read a block and its trailer, verify the checksum, and decompress it.
pub(crate) fn read_block(file: &File, handle: &BlockHandle) -> Result<Bytes> {
    let n = handle.size as usize;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    read_at(file, handle.offset, &mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::corruption("truncated block read")
        } else {
            Error::Io(e)
        }
    })?;

    let expected = checksum::unmask(decode_fixed32(&buf[n + 1..]));
    let actual = checksum::value(&buf[..n + 1]);
    if actual != expected {
        return Err(Error::corruption(format!(
            "block checksum mismatch at offset {}",
            handle.offset
        )));
    }

    match CompressionType::from_u8(buf[n])? {
        CompressionType::None => {
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        CompressionType::Snappy => {
            let decompressed = snap::raw::Decoder::new()
                .decompress_vec(&buf[..n])
                .map_err(|_| Error::corruption("corrupted compressed block contents"))?;
            Ok(Bytes::from(decompressed))
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
