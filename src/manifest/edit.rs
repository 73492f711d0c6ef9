use crate::coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use crate::error::{Error, Result};
use crate::types::{InternalKey, NUM_LEVELS, SequenceNumber};

// Record tags. Tag 8 was used by a long-gone large-value format.
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A table file as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// One atomic change to the set of live files plus engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, NewFile)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            NewFile {
                number,
                file_size,
                smallest,
                largest,
            },
        ));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some(name) = &self.comparator {
            put_varint32(&mut dst, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut dst, TAG_LOG_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(&mut dst, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut dst, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut dst, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut dst, TAG_LAST_SEQUENCE);
            put_varint64(&mut dst, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut dst, TAG_COMPACT_POINTER);
            put_varint32(&mut dst, *level as u32);
            put_length_prefixed_slice(&mut dst, &key.encode());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut dst, TAG_DELETED_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut dst, TAG_NEW_FILE);
            put_varint32(&mut dst, *level as u32);
            put_varint64(&mut dst, file.number);
            put_varint64(&mut dst, file.file_size);
            put_length_prefixed_slice(&mut dst, &file.smallest.encode());
            put_length_prefixed_slice(&mut dst, &file.largest.encode());
        }
        dst
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut input = src;
        while !input.is_empty() {
            let tag = get_varint32(&mut input).ok_or_else(|| bad("tag"))?;
            match tag {
                TAG_COMPARATOR => {
                    let name = get_length_prefixed_slice(&mut input)
                        .and_then(|s| std::str::from_utf8(s).ok())
                        .ok_or_else(|| bad("comparator name"))?;
                    edit.comparator = Some(name.to_string());
                }
                TAG_LOG_NUMBER => {
                    edit.log_number = Some(get_varint64(&mut input).ok_or_else(|| bad("log number"))?);
                }
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number =
                        Some(get_varint64(&mut input).ok_or_else(|| bad("previous log number"))?);
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number =
                        Some(get_varint64(&mut input).ok_or_else(|| bad("next file number"))?);
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence =
                        Some(get_varint64(&mut input).ok_or_else(|| bad("last sequence number"))?);
                }
                TAG_COMPACT_POINTER => {
                    let level = get_level(&mut input).ok_or_else(|| bad("compaction pointer"))?;
                    let key = get_internal_key(&mut input).ok_or_else(|| bad("compaction pointer"))?;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = get_level(&mut input).ok_or_else(|| bad("deleted file"))?;
                    let number = get_varint64(&mut input).ok_or_else(|| bad("deleted file"))?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let file = (|| {
                        let level = get_level(&mut input)?;
                        let number = get_varint64(&mut input)?;
                        let file_size = get_varint64(&mut input)?;
                        let smallest = get_internal_key(&mut input)?;
                        let largest = get_internal_key(&mut input)?;
                        Some((
                            level,
                            NewFile {
                                number,
                                file_size,
                                smallest,
                                largest,
                            },
                        ))
                    })()
                    .ok_or_else(|| bad("new-file entry"))?;
                    edit.new_files.push(file);
                }
                _ => return Err(bad("unknown tag")),
            }
        }
        Ok(edit)
    }
}

fn bad(what: &str) -> Error {
    Error::corruption(format!("VersionEdit: {what}"))
}

fn get_level(input: &mut &[u8]) -> Option<usize> {
    let level = get_varint32(input)? as usize;
    (level < NUM_LEVELS).then_some(level)
}

fn get_internal_key(input: &mut &[u8]) -> Option<InternalKey> {
    InternalKey::decode(get_length_prefixed_slice(input)?)
}
