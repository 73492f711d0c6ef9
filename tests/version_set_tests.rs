// Version set: manifest persistence, recovery, and compaction picking.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use lsm_kv::cache::TableCache;
use lsm_kv::comparator::{Comparator, InternalKeyComparator};
use lsm_kv::filename::{current_file_name, descriptor_file_name};
use lsm_kv::manifest::{VersionEdit, VersionSet};
use lsm_kv::sstable::TableOptions;
use lsm_kv::types::{InternalKey, ValueType};
use lsm_kv::Options;
use tempfile::tempdir;

fn version_set(dir: &Path, options: Options) -> VersionSet {
    let options = Arc::new(options);
    let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
    let table_cache = Arc::new(TableCache::new(dir, TableOptions::new(Arc::new(icmp)), 10));
    VersionSet::new(dir, options, table_cache)
}

fn ikey(user: &str, seq: u64) -> InternalKey {
    InternalKey::new(user.as_bytes(), seq, ValueType::Put)
}

fn add_file(vs: &mut VersionSet, level: usize, smallest: &str, largest: &str) -> u64 {
    let number = vs.new_file_number();
    let mut edit = VersionEdit::new();
    edit.add_file(level, number, 1000, ikey(smallest, 100), ikey(largest, 100));
    vs.log_and_apply(&mut edit).unwrap();
    number
}

// =============================================================================
// Test 1: A fresh database starts at MANIFEST-000001
// =============================================================================
#[test]
fn create_new_then_recover() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();
    assert_eq!(fs::read_to_string(current_file_name(dir.path())).unwrap(), "MANIFEST-000001\n");

    vs.recover().unwrap();
    assert_eq!(vs.last_sequence(), 0);
    assert_eq!(vs.log_number(), 0);
    assert_eq!(vs.manifest_file_number(), 2);
    assert_eq!(vs.new_file_number(), 3);
    assert_eq!(vs.level_summary(), "files[ 0 0 0 0 0 0 0 ]");
}

// =============================================================================
// Test 2: Applied edits survive a restart
// =============================================================================
#[test]
fn edits_are_recovered_after_restart() {
    let dir = tempdir().unwrap();
    let (l0, l1);
    {
        let mut vs = version_set(dir.path(), Options::default());
        vs.create_new().unwrap();
        vs.recover().unwrap();
        vs.set_last_sequence(77);
        l0 = add_file(&mut vs, 0, "a", "m");
        l1 = add_file(&mut vs, 1, "n", "z");
        assert!(descriptor_file_name(dir.path(), 2).exists());
    }

    let mut vs = version_set(dir.path(), Options::default());
    vs.recover().unwrap();
    assert_eq!(vs.last_sequence(), 77);
    assert_eq!(vs.num_level_files(0), 1);
    assert_eq!(vs.num_level_files(1), 1);
    assert_eq!(vs.num_level_bytes(1), 1000);
    let current = vs.current();
    assert_eq!(current.files(0)[0].number, l0);
    assert_eq!(current.files(1)[0].number, l1);
    assert!(vs.live_files().contains(&l0));
    assert!(vs.new_file_number() > l1);
}

// =============================================================================
// Test 3: Deleting a file removes it from the next version only
// =============================================================================
#[test]
fn old_versions_keep_their_files_live() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();
    vs.recover().unwrap();
    let number = add_file(&mut vs, 1, "a", "c");

    let pinned = vs.current();
    let mut edit = VersionEdit::new();
    edit.delete_file(1, number);
    vs.log_and_apply(&mut edit).unwrap();

    assert_eq!(vs.num_level_files(1), 0);
    assert!(vs.live_files().contains(&number));
    drop(pinned);
    assert!(!vs.live_files().contains(&number));
}

// =============================================================================
// Test 4: Overlapping files within a sorted level are rejected
// =============================================================================
#[test]
fn overlapping_level_files_are_corruption() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();
    vs.recover().unwrap();
    add_file(&mut vs, 2, "a", "k");

    let mut edit = VersionEdit::new();
    edit.add_file(2, vs.new_file_number(), 10, ikey("f", 5), ikey("p", 5));
    assert!(vs.log_and_apply(&mut edit).unwrap_err().is_corruption());
    assert_eq!(vs.num_level_files(2), 1);
}

// =============================================================================
// Test 5: Reopening with a different comparator is refused
// =============================================================================
struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    fn name(&self) -> &str {
        "test.ReverseComparator"
    }
}

#[test]
fn comparator_mismatch_is_invalid_argument() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();

    let options = Options {
        comparator: Arc::new(ReverseComparator),
        ..Options::default()
    };
    let mut vs = version_set(dir.path(), options);
    let err = vs.recover().unwrap_err();
    assert!(err.is_invalid_argument(), "{err}");
}

// =============================================================================
// Test 6: CURRENT naming a missing manifest is corruption
// =============================================================================
#[test]
fn missing_manifest_is_corruption() {
    let dir = tempdir().unwrap();
    fs::write(current_file_name(dir.path()), "MANIFEST-000009\n").unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    assert!(vs.recover().unwrap_err().is_corruption());
}

// =============================================================================
// Test 7: Too many level-0 files trigger a compaction into level 1
// =============================================================================
#[test]
fn level0_file_count_triggers_compaction() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();
    vs.recover().unwrap();

    add_file(&mut vs, 1, "c", "e");
    add_file(&mut vs, 1, "x", "y");
    for _ in 0..3 {
        add_file(&mut vs, 0, "a", "d");
    }
    assert!(!vs.needs_compaction());
    add_file(&mut vs, 0, "b", "f");
    assert!(vs.needs_compaction());

    let c = vs.pick_compaction().unwrap();
    assert_eq!(c.level, 0);
    assert_eq!(c.inputs[0].len(), 4);
    assert_eq!(c.inputs[1].len(), 1);
    assert_eq!(c.inputs[1][0].smallest_user_key(), b"c");
    assert!(!c.is_trivial_move());
}

// =============================================================================
// Test 8: Manual compaction of an empty range has nothing to do
// =============================================================================
#[test]
fn compact_range_selects_overlapping_files() {
    let dir = tempdir().unwrap();
    let mut vs = version_set(dir.path(), Options::default());
    vs.create_new().unwrap();
    vs.recover().unwrap();
    add_file(&mut vs, 1, "a", "c");
    add_file(&mut vs, 1, "m", "p");

    let begin = ikey("d", u64::MAX >> 8).encode();
    let end = ikey("k", 0).encode();
    assert!(vs.compact_range(1, Some(&begin), Some(&end)).is_none());

    let end = ikey("n", 0).encode();
    let c = vs.compact_range(1, Some(&begin), Some(&end)).unwrap();
    assert_eq!(c.inputs[0].len(), 1);
    assert_eq!(c.inputs[0][0].smallest_user_key(), b"m");
    assert!(c.is_trivial_move());
}
