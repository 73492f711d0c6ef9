// Log reader: reassembly, corruption handling, and torn tails.

use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::Path;

use lsm_kv::wal::{BLOCK_SIZE, HEADER_SIZE, LogReader, LogWriter};
use tempfile::tempdir;

fn write_records(path: &Path, records: &[Vec<u8>]) {
    let mut writer = LogWriter::create(path).unwrap();
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.sync().unwrap();
}

fn read_all(path: &Path, strict: bool) -> lsm_kv::Result<Vec<Vec<u8>>> {
    LogReader::open(path, strict).unwrap().collect()
}

// =============================================================================
// Test 1: Records come back in order
// =============================================================================
#[test]
fn reads_back_written_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    let records = vec![b"one".to_vec(), Vec::new(), b"three".to_vec()];
    write_records(&path, &records);
    assert_eq!(read_all(&path, true).unwrap(), records);
}

// =============================================================================
// Test 2: Fragmented records are reassembled
// =============================================================================
#[test]
fn reassembles_records_spanning_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    let records: Vec<Vec<u8>> = vec![
        vec![1u8; 100],
        (0..BLOCK_SIZE * 3).map(|i| (i % 251) as u8).collect(),
        vec![2u8; BLOCK_SIZE - HEADER_SIZE],
        b"tail".to_vec(),
    ];
    write_records(&path, &records);
    assert_eq!(read_all(&path, true).unwrap(), records);
}

// =============================================================================
// Test 3: Empty log
// =============================================================================
#[test]
fn empty_log_has_no_records() {
    let mut reader = LogReader::new(Cursor::new(Vec::new()), true);
    assert_eq!(reader.read_record().unwrap(), None);
}

// =============================================================================
// Test 4: A torn tail reads as a clean end of log, even in strict mode
// =============================================================================
#[test]
fn truncated_tail_is_end_of_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    write_records(&path, &[b"complete".to_vec(), vec![b'z'; 1000]]);

    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 10).unwrap();

    assert_eq!(read_all(&path, true).unwrap(), vec![b"complete".to_vec()]);
}

// =============================================================================
// Test 5: Checksum mismatch, tolerant vs strict
// =============================================================================
#[test]
fn checksum_mismatch_tolerant_and_strict() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    write_records(&path, &[b"good".to_vec(), b"flipped".to_vec(), b"after".to_vec()]);

    // Flip a payload byte of the second record.
    let mut bytes = fs::read(&path).unwrap();
    let second_payload = HEADER_SIZE + 4 + HEADER_SIZE;
    bytes[second_payload] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    assert_eq!(read_all(&path, false).unwrap(), vec![b"good".to_vec()]);

    let mut reader = LogReader::open(&path, true).unwrap();
    assert_eq!(reader.read_record().unwrap(), Some(b"good".to_vec()));
    let err = reader.read_record().unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(reader.read_record().unwrap(), None);
}

// =============================================================================
// Test 6: Garbage appended after valid records
// =============================================================================
#[test]
fn trailing_garbage_is_dropped_in_tolerant_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    write_records(&path, &[b"keep".to_vec()]);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    // Well-framed header with a bad checksum.
    file.write_all(&[0xab, 0xab, 0xab, 0xab, 4, 0, 1]).unwrap();
    file.write_all(b"junk").unwrap();
    drop(file);

    assert_eq!(read_all(&path, false).unwrap(), vec![b"keep".to_vec()]);
    assert!(read_all(&path, true).is_err());
}
