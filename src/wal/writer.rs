use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::wal::record::{BLOCK_SIZE, HEADER_SIZE, RecordType, encode_header};

/// Appends records to a log file.
///
/// Every record is flushed to the OS when `add_record` returns, so a process
/// crash loses nothing that was acknowledged. Surviving a machine crash
/// additionally needs `sync`.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_data()   → OS page cache → physical disk
pub struct LogWriter {
    writer: BufWriter<File>,
    block_offset: usize,
    offset: u64,
}

impl LogWriter {
    /// Create (or truncate) a log file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Wrap a file positioned at offset zero.
    pub fn new(file: File) -> Self {
        LogWriter {
            writer: BufWriter::new(file),
            block_offset: 0,
            offset: 0,
        }
    }

    /// Append one logical record, fragmenting it across blocks as needed.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data;
        let mut is_first = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not enough room for a header: pad the block tail and switch.
                if leftover > 0 {
                    self.writer.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                    self.offset += leftover as u64;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(available);
            let is_last = fragment_len == left.len();
            let record_type = RecordType::for_fragment(is_first, is_last);
            self.emit_physical_record(record_type, &left[..fragment_len])?;

            left = &left[fragment_len..];
            is_first = false;
            if is_last {
                break;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        let header = encode_header(record_type, payload);
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;
        let written = HEADER_SIZE + payload.len();
        self.block_offset += written;
        self.offset += written as u64;
        Ok(())
    }

    /// Force everything written so far onto the disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Bytes written to the file so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
