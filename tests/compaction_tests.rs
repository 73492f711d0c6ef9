// Compaction: flushes, level-0 merges, manual compaction, and what survives.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use lsm_kv::{CompressionType, DB, Options, ReadOptions, WriteOptions};
use tempfile::tempdir;

fn small_options() -> Options {
    Options {
        create_if_missing: true,
        write_buffer_size: 64 * 1024,
        max_file_size: 1 << 20,
        ..Options::default()
    }
}

fn open_small(path: &Path) -> DB {
    DB::open(path, small_options()).unwrap()
}

fn value_for(i: u32, round: u32) -> Vec<u8> {
    let mut value = format!("value-{i}-{round}-").into_bytes();
    value.resize(500, b'0' + (i % 10) as u8);
    value
}

fn files_at(db: &DB, level: usize) -> usize {
    db.get_property(&format!("leveldb.num-files-at-level{level}"))
        .unwrap()
        .parse()
        .unwrap()
}

fn total_files(db: &DB) -> usize {
    (0..7).map(|level| files_at(db, level)).sum()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}

// =============================================================================
// Test 1: Many memtables' worth of writes stay readable through compactions
// =============================================================================
#[test]
fn writes_survive_background_compaction() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    for round in 0..3 {
        for i in 0..2000u32 {
            db.put(&w, format!("key{i:06}").as_bytes(), &value_for(i, round)).unwrap();
        }
    }
    wait_until("level 0 to drain", || files_at(&db, 0) < 4);

    for i in 0..2000u32 {
        let got = db.get(&ReadOptions::default(), format!("key{i:06}").as_bytes()).unwrap();
        assert_eq!(got, Some(value_for(i, 2)), "key{i:06}");
    }
    let stats = db.stats();
    assert!(stats.levels.iter().any(|l| l.compaction.bytes_written > 0));
    assert!(stats.levels[1..].iter().any(|l| l.files > 0));
    assert_eq!(stats.background_errors, 0);
}

// =============================================================================
// Test 2: Full manual compaction removes deleted and overwritten data
// =============================================================================
#[test]
fn compact_range_drops_obsolete_entries() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    for i in 0..500u32 {
        db.put(&w, format!("key{i:04}").as_bytes(), &value_for(i, 0)).unwrap();
    }
    db.flush().unwrap();
    for i in 0..500u32 {
        db.delete(&w, format!("key{i:04}").as_bytes()).unwrap();
    }
    db.flush().unwrap();
    assert!(total_files(&db) >= 2);

    db.compact_range(None, None).unwrap();
    assert_eq!(total_files(&db), 0);
    assert!(db.iter(&ReadOptions::default()).unwrap().entries().next().is_none());
}

// =============================================================================
// Test 3: A live snapshot keeps the versions it can see
// =============================================================================
#[test]
fn compaction_preserves_snapshot_versions() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    db.put(&w, b"k", b"v1").unwrap();
    db.put(&w, b"gone", b"here").unwrap();
    let snapshot = db.get_snapshot();
    db.put(&w, b"k", b"v2").unwrap();
    db.delete(&w, b"gone").unwrap();

    db.compact_range(None, None).unwrap();

    let old = ReadOptions::new().with_snapshot(&snapshot);
    assert_eq!(db.get(&old, b"k").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.get(&old, b"gone").unwrap(), Some(b"here".to_vec()));
    assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(&ReadOptions::default(), b"gone").unwrap(), None);

    // Once released, a second compaction may drop the hidden versions.
    db.release_snapshot(snapshot);
    db.compact_range(None, None).unwrap();
    assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(&ReadOptions::default(), b"gone").unwrap(), None);
}

// =============================================================================
// Test 4: Compacting part of the key space leaves the rest in place
// =============================================================================
#[test]
fn compact_range_on_subrange() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    for prefix in ["a", "m", "z"] {
        for i in 0..200u32 {
            db.put(&w, format!("{prefix}{i:04}").as_bytes(), &value_for(i, 0)).unwrap();
        }
        db.flush().unwrap();
    }
    db.compact_range(Some(b"m"), Some(b"m9999")).unwrap();

    for prefix in ["a", "m", "z"] {
        for i in (0..200u32).step_by(37) {
            let got = db.get(&ReadOptions::default(), format!("{prefix}{i:04}").as_bytes()).unwrap();
            assert_eq!(got, Some(value_for(i, 0)));
        }
    }
    assert_eq!(files_at(&db, 0), 0);
}

// =============================================================================
// Test 5: Paused compactions let level 0 grow until resumed
// =============================================================================
#[test]
fn pause_and_resume_background_work() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();

    db.pause_background_work();
    for round in 0..6u32 {
        for i in 0..50u32 {
            db.put(&w, format!("key{i:03}").as_bytes(), &value_for(i, round)).unwrap();
        }
        // Flushes still run while paused.
        db.flush().unwrap();
    }
    assert!(files_at(&db, 0) >= 4, "{}", db.get_property("leveldb.sstables").unwrap());

    db.resume_background_work();
    wait_until("level 0 compaction", || files_at(&db, 0) < 4);
    for i in 0..50u32 {
        let got = db.get(&ReadOptions::default(), format!("key{i:03}").as_bytes()).unwrap();
        assert_eq!(got, Some(value_for(i, 5)));
    }
}

// =============================================================================
// Test 6: Values larger than a block
// =============================================================================
#[test]
fn large_values_through_compaction() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    let big = |i: u8| vec![i; 100_000];
    for i in 0..10u8 {
        db.put(&w, &[b'k', i], &big(i)).unwrap();
    }
    db.compact_range(None, None).unwrap();
    for i in 0..10u8 {
        assert_eq!(db.get(&ReadOptions::default(), &[b'k', i]).unwrap(), Some(big(i)));
    }
    let scanned = db.iter(&ReadOptions::default()).unwrap().entries().count();
    assert_eq!(scanned, 10);
}

// =============================================================================
// Test 7: Iterators opened before a compaction keep reading their files
// =============================================================================
#[test]
fn iterator_outlives_compaction_of_its_files() {
    let dir = tempdir().unwrap();
    let db = open_small(dir.path());
    let w = WriteOptions::default();
    for i in 0..300u32 {
        db.put(&w, format!("key{i:04}").as_bytes(), &value_for(i, 0)).unwrap();
    }
    db.flush().unwrap();

    let iter = db.iter(&ReadOptions::default()).unwrap();
    for i in 0..300u32 {
        db.put(&w, format!("key{i:04}").as_bytes(), &value_for(i, 1)).unwrap();
    }
    db.compact_range(None, None).unwrap();

    let mut count = 0u32;
    for entry in iter.entries() {
        let (key, value) = entry.unwrap();
        assert_eq!(key, format!("key{count:04}").into_bytes());
        assert_eq!(value, value_for(count, 0));
        count += 1;
    }
    assert_eq!(count, 300);
}

// =============================================================================
// Test 8: A manual compaction that hits a damaged table reports the error
// =============================================================================
#[test]
fn failed_manual_compaction_is_reported() {
    let dir = tempdir().unwrap();
    let options = Options {
        compression: CompressionType::None,
        paranoid_checks: true,
        ..small_options()
    };
    let db = DB::open(dir.path(), options).unwrap();
    let w = WriteOptions::default();
    db.put(&w, b"a", b"GOODVALUE").unwrap();
    db.put(&w, b"c", b"other").unwrap();
    db.flush().unwrap();
    // Overlaps the first table, so it lands one level above it.
    db.put(&w, b"b", b"middle").unwrap();
    db.flush().unwrap();
    assert_eq!(files_at(&db, 1), 1);
    assert_eq!(files_at(&db, 2), 1);

    let damaged = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "ldb"))
        .find_map(|path| {
            let mut bytes = fs::read(&path).unwrap();
            let at = bytes.windows(4).position(|w| w == b"GOOD")?;
            bytes[at..at + 4].copy_from_slice(b"EVIL");
            fs::write(&path, &bytes).unwrap();
            Some(path)
        });
    assert!(damaged.is_some());

    let err = db.compact_range(None, None).unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err}");
    assert_eq!(total_files(&db), 2);
    assert!(db.stats().background_errors >= 1);

    // The undamaged table keeps serving reads.
    assert_eq!(db.get(&ReadOptions::default(), b"b").unwrap(), Some(b"middle".to_vec()));
}
