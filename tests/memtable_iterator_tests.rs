// MemTable iterator: ordered traversal, seek, and reverse movement.

use std::sync::Arc;

use lsm_kv::comparator::{InternalKeyComparator, bytewise};
use lsm_kv::iterator::StorageIterator;
use lsm_kv::memtable::{MemTable, MemTableIterator};
use lsm_kv::types::{LookupKey, MAX_SEQUENCE_NUMBER, ValueType, extract_user_key};

fn abc() -> Arc<MemTable> {
    let mt = Arc::new(MemTable::new(InternalKeyComparator::new(bytewise()), 1 << 20));
    mt.add(1, ValueType::Put, b"charlie", b"3");
    mt.add(2, ValueType::Put, b"alpha", b"1");
    mt.add(3, ValueType::Put, b"bravo", b"2");
    mt
}

fn user_key(iter: &MemTableIterator) -> &[u8] {
    extract_user_key(iter.key())
}

fn seek(iter: &mut MemTableIterator, key: &[u8]) {
    iter.seek(LookupKey::new(key, MAX_SEQUENCE_NUMBER).internal_key()).unwrap();
}

// =============================================================================
// Test 1: Empty table yields an invalid iterator
// =============================================================================
#[test]
fn iterator_on_empty_table_is_invalid() {
    let mt = Arc::new(MemTable::new(InternalKeyComparator::new(bytewise()), 1 << 20));
    let mut iter = mt.iter();
    assert!(!iter.is_valid());
    iter.seek_to_first().unwrap();
    assert!(!iter.is_valid());
    iter.seek_to_last().unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 2: Seek lands on the first key at or after the target
// =============================================================================
#[test]
fn iterator_seek_semantics() {
    let mt = abc();
    let mut iter = mt.iter();

    seek(&mut iter, b"bravo");
    assert_eq!(user_key(&iter), b"bravo");
    assert_eq!(iter.value(), b"2");

    seek(&mut iter, b"b");
    assert_eq!(user_key(&iter), b"bravo");

    seek(&mut iter, b"a");
    assert_eq!(user_key(&iter), b"alpha");

    seek(&mut iter, b"zulu");
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 3: Backward walk from the last key
// =============================================================================
#[test]
fn iterator_walks_backward() {
    let mt = abc();
    let mut iter = mt.iter();
    iter.seek_to_last().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push(user_key(&iter).to_vec());
        iter.prev().unwrap();
    }
    assert_eq!(seen, vec![b"charlie".to_vec(), b"bravo".to_vec(), b"alpha".to_vec()]);
}

// =============================================================================
// Test 4: Direction changes mid-walk
// =============================================================================
#[test]
fn iterator_switches_direction() {
    let mt = abc();
    let mut iter = mt.iter();
    seek(&mut iter, b"bravo");
    iter.prev().unwrap();
    assert_eq!(user_key(&iter), b"alpha");
    iter.next().unwrap();
    assert_eq!(user_key(&iter), b"bravo");
    iter.next().unwrap();
    assert_eq!(user_key(&iter), b"charlie");
    iter.next().unwrap();
    assert!(!iter.is_valid());
    iter.seek_to_first().unwrap();
    assert_eq!(user_key(&iter), b"alpha");
}

// =============================================================================
// Test 5: Many keys inserted in reverse come out sorted
// =============================================================================
#[test]
fn iterator_collects_all_entries_sorted() {
    let mt = Arc::new(MemTable::new(InternalKeyComparator::new(bytewise()), 1 << 20));
    for i in (0..500u32).rev() {
        mt.add(u64::from(500 - i), ValueType::Put, format!("key_{i:04}").as_bytes(), &i.to_be_bytes());
    }
    let mut iter = mt.iter();
    iter.seek_to_first().unwrap();
    let mut count = 0u32;
    while iter.is_valid() {
        assert_eq!(user_key(&iter), format!("key_{count:04}").as_bytes());
        assert_eq!(iter.value(), count.to_be_bytes());
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 500);
}
