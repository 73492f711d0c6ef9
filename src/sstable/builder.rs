use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::checksum;
use crate::error::{Error, Result};
use crate::options::CompressionType;
use crate::sstable::TableOptions;
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};

/// Builds an SSTable file from a sorted stream of key-value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
///
/// Build process:
/// 1. Add entries one by one (must be in strictly increasing order)
/// 2. Entries fill up blocks; when a block reaches `block_size` it's written out
/// 3. finish() flushes the last block, writes filter, meta-index, index, footer, fsync
///
/// The index entry for a block is only emitted once the first key of the next
/// block is known, so the separator stored in the index can be shortened.
pub struct SSTableBuilder {
    options: TableOptions,
    writer: BufWriter<File>,
    /// Tracks current write position in the file.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    num_entries: u64,
    /// Handle of the last flushed data block, awaiting its index entry.
    pending_handle: Option<BlockHandle>,
    compressed_scratch: Vec<u8>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    pub fn create(path: &Path, options: TableOptions) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file, options))
    }

    pub fn new(file: File, options: TableOptions) -> Self {
        let mut filter_block = options
            .filter_policy
            .clone()
            .map(FilterBlockBuilder::new);
        if let Some(filter) = filter_block.as_mut() {
            filter.start_block(0);
        }
        SSTableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            filter_block,
            writer: BufWriter::new(file),
            offset: 0,
            last_key: Vec::new(),
            num_entries: 0,
            pending_handle: None,
            compressed_scratch: Vec::new(),
            options,
        }
    }

    /// Add a key-value pair. Keys must be strictly increasing under the
    /// table comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::corruption("table keys added out of order"));
        }

        if let Some(handle) = self.pending_handle.take() {
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            self.index_block.add(&self.last_key, &handle.encode());
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.estimated_size() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out the current data block, if any.
    fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(self.pending_handle.is_none());
        let contents = self.data_block.finish();
        let handle = self.write_block(&contents)?;
        self.pending_handle = Some(handle);
        if let Some(filter) = self.filter_block.as_mut() {
            filter.start_block(self.offset);
        }
        Ok(())
    }

    /// Compress (when it saves at least 12.5%) and write a finished block.
    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        if self.options.compression == CompressionType::Snappy {
            let mut encoder = snap::raw::Encoder::new();
            self.compressed_scratch.resize(snap::raw::max_compress_len(raw.len()), 0);
            if let Ok(n) = encoder.compress(raw, &mut self.compressed_scratch) {
                if n < raw.len() - raw.len() / 8 {
                    let compressed = std::mem::take(&mut self.compressed_scratch);
                    let handle = self.write_raw_block(&compressed[..n], CompressionType::Snappy);
                    self.compressed_scratch = compressed;
                    return handle;
                }
            }
        }
        self.write_raw_block(raw, CompressionType::None)
    }

    fn write_raw_block(&mut self, contents: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let type_byte = compression as u8;
        let crc = checksum::mask(checksum::value_of(&[contents, &[type_byte]]));
        self.writer.write_all(contents)?;
        self.writer.write_all(&[type_byte])?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.offset += contents.len() as u64 + 5;
        Ok(handle)
    }

    /// Finalize the SSTable: flush last block, write filter, meta-index,
    /// index and footer, then fsync. Returns the file size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;

        let filter_handle = match self.filter_block.as_mut() {
            Some(filter) => {
                let contents = filter.finish();
                Some(self.write_raw_block(&contents, CompressionType::None)?)
            }
            None => None,
        };

        let mut metaindex = BlockBuilder::new(self.options.block_restart_interval);
        if let (Some(handle), Some(policy)) = (filter_handle, self.options.filter_policy.as_ref()) {
            let key = format!("filter.{}", policy.name());
            metaindex.add(key.as_bytes(), &handle.encode());
        }
        let metaindex_contents = metaindex.finish();
        let metaindex_handle = self.write_block(&metaindex_contents)?;

        if let Some(handle) = self.pending_handle.take() {
            self.options.comparator.find_short_successor(&mut self.last_key);
            self.index_block.add(&self.last_key, &handle.encode());
        }
        let index_contents = self.index_block.finish();
        let index_handle = self.write_block(&index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::ENCODED_LENGTH as u64;

        // Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.offset)
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; the size of the file if `finish` were called
    /// now, minus the unwritten tail.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
