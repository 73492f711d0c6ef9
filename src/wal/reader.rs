use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::warn;

use crate::coding::decode_fixed32;
use crate::checksum;
use crate::error::{Error, Result};
use crate::wal::record::{BLOCK_SIZE, HEADER_SIZE, RecordType, fragment_crc};

/// Reads logical records back from a log, one 32 KiB block at a time.
///
/// Two modes:
///   - tolerant: the first bad fragment (checksum, length or framing) ends the
///     log with a warning. Everything before it was written completely.
///   - strict: the same conditions yield a `Corruption` error.
///
/// In both modes a trailing fragment cut short by end-of-file is the tail of a
/// write that never finished and reads as a clean end of log.
pub struct LogReader<R> {
    source: R,
    block: Vec<u8>,
    pos: usize,
    eof: bool,
    strict: bool,
    finished: bool,
    /// Bytes consumed from the source so far, for error messages.
    consumed: u64,
}

enum Physical {
    Record(RecordType, std::ops::Range<usize>),
    Eof,
    Bad(String),
}

impl LogReader<File> {
    pub fn open(path: &Path, strict: bool) -> Result<Self> {
        Ok(LogReader::new(File::open(path)?, strict))
    }
}

impl<R: Read> LogReader<R> {
    pub fn new(source: R, strict: bool) -> Self {
        LogReader {
            source,
            block: Vec::with_capacity(BLOCK_SIZE),
            pos: 0,
            eof: false,
            strict,
            finished: false,
            consumed: 0,
        }
    }

    /// Next logical record, `Ok(None)` at end of log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        loop {
            match self.read_physical_record()? {
                Physical::Record(RecordType::Full, range) => {
                    if in_fragmented_record {
                        return self.report("partial record without end");
                    }
                    return Ok(Some(self.block[range].to_vec()));
                }
                Physical::Record(RecordType::First, range) => {
                    if in_fragmented_record {
                        return self.report("partial record without end");
                    }
                    scratch.clear();
                    scratch.extend_from_slice(&self.block[range]);
                    in_fragmented_record = true;
                }
                Physical::Record(RecordType::Middle, range) => {
                    if !in_fragmented_record {
                        return self.report("missing start of fragmented record");
                    }
                    scratch.extend_from_slice(&self.block[range]);
                }
                Physical::Record(RecordType::Last, range) => {
                    if !in_fragmented_record {
                        return self.report("missing start of fragmented record");
                    }
                    scratch.extend_from_slice(&self.block[range]);
                    return Ok(Some(scratch));
                }
                // Zero-length padding left by preallocation.
                Physical::Record(RecordType::Zero, _) => {
                    self.pos = self.block.len();
                }
                // A partially written fragmented record at EOF is dropped.
                Physical::Eof => {
                    self.finished = true;
                    return Ok(None);
                }
                Physical::Bad(reason) => return self.report(&reason),
            }
        }
    }

    fn report(&mut self, reason: &str) -> Result<Option<Vec<u8>>> {
        self.finished = true;
        if self.strict {
            return Err(Error::corruption(format!(
                "log record near offset {}: {reason}",
                self.consumed
            )));
        }
        warn!(offset = self.consumed, reason, "dropping log tail after bad record");
        Ok(None)
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.block.len() - self.pos < HEADER_SIZE {
                if self.eof {
                    // A truncated header at the very end is an unfinished write.
                    return Ok(Physical::Eof);
                }
                self.fill_block()?;
                if self.block.is_empty() {
                    return Ok(Physical::Eof);
                }
                continue;
            }

            let header = &self.block[self.pos..self.pos + HEADER_SIZE];
            let stored_crc = decode_fixed32(header);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            let start = self.pos + HEADER_SIZE;
            let end = start + length;
            if end > self.block.len() {
                self.pos = self.block.len();
                if self.eof {
                    return Ok(Physical::Eof);
                }
                return Ok(Physical::Bad(format!("bad record length {length}")));
            }

            if type_byte == RecordType::Zero as u8 && length == 0 {
                self.pos = self.block.len();
                return Ok(Physical::Record(RecordType::Zero, start..start));
            }

            let actual = fragment_crc(type_byte, &self.block[start..end]);
            if actual != checksum::unmask(stored_crc) {
                self.pos = self.block.len();
                return Ok(Physical::Bad("checksum mismatch".to_string()));
            }
            self.pos = end;

            return Ok(match RecordType::from_u8(type_byte) {
                Some(record_type) => Physical::Record(record_type, start..end),
                None => Physical::Bad(format!("unknown record type {type_byte}")),
            });
        }
    }

    fn fill_block(&mut self) -> Result<()> {
        self.block.clear();
        self.block.resize(BLOCK_SIZE, 0);
        self.pos = 0;
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.source.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.block.clear();
                    return Err(e.into());
                }
            }
        }
        self.block.truncate(filled);
        self.consumed += filled as u64;
        if filled < BLOCK_SIZE {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
