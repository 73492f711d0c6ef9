// Merge iterator: k-way merge of sorted sources, newest source first on ties.

use bytes::Bytes;
use lsm_kv::comparator::bytewise;
use lsm_kv::iterator::{BoxedIterator, MergeIterator, StorageIterator};
use lsm_kv::sstable::block::{Block, BlockBuilder};

fn source(entries: &[(&str, &str)]) -> BoxedIterator {
    let mut builder = BlockBuilder::new(2);
    for (k, v) in entries {
        builder.add(k.as_bytes(), v.as_bytes());
    }
    let block = Block::decode(Bytes::from(builder.finish())).unwrap();
    Box::new(block.iter(bytewise()))
}

fn collect_forward(iter: &mut MergeIterator) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((
            String::from_utf8(iter.key().to_vec()).unwrap(),
            String::from_utf8(iter.value().to_vec()).unwrap(),
        ));
        iter.next().unwrap();
    }
    out
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

// =============================================================================
// Test 1: Disjoint sources interleave in key order
// =============================================================================
#[test]
fn merges_disjoint_sources() {
    let mut iter = MergeIterator::new(
        bytewise(),
        vec![
            source(&[("a", "1"), ("d", "4")]),
            source(&[("b", "2"), ("e", "5")]),
            source(&[("c", "3")]),
        ],
    );
    iter.seek_to_first().unwrap();
    assert_eq!(
        collect_forward(&mut iter),
        pairs(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")])
    );
}

// =============================================================================
// Test 2: Equal keys are all yielded, lowest child index first
// =============================================================================
#[test]
fn duplicate_keys_come_out_in_child_order() {
    let mut iter = MergeIterator::new(
        bytewise(),
        vec![
            source(&[("k", "newest")]),
            source(&[("k", "middle")]),
            source(&[("k", "oldest")]),
        ],
    );
    iter.seek_to_first().unwrap();
    assert_eq!(
        collect_forward(&mut iter),
        pairs(&[("k", "newest"), ("k", "middle"), ("k", "oldest")])
    );
}

// =============================================================================
// Test 3: Empty sources and no sources
// =============================================================================
#[test]
fn empty_children_are_skipped() {
    let mut iter = MergeIterator::new(bytewise(), vec![source(&[]), source(&[("x", "1")]), source(&[])]);
    iter.seek_to_first().unwrap();
    assert_eq!(collect_forward(&mut iter), pairs(&[("x", "1")]));

    let mut none = MergeIterator::new(bytewise(), Vec::new());
    none.seek_to_first().unwrap();
    assert!(!none.is_valid());
}

// =============================================================================
// Test 4: Seek positions every child
// =============================================================================
#[test]
fn seek_lands_on_smallest_key_at_or_after_target() {
    let mut iter = MergeIterator::new(
        bytewise(),
        vec![source(&[("a", "1"), ("m", "2")]), source(&[("f", "3"), ("z", "4")])],
    );
    iter.seek(b"g").unwrap();
    assert_eq!(collect_forward(&mut iter), pairs(&[("m", "2"), ("z", "4")]));
}

// =============================================================================
// Test 5: Reverse iteration and direction changes
// =============================================================================
#[test]
fn reverse_and_direction_switches() {
    let mut iter = MergeIterator::new(
        bytewise(),
        vec![
            source(&[("a", "1"), ("c", "3"), ("e", "5")]),
            source(&[("b", "2"), ("d", "4"), ("f", "6")]),
        ],
    );
    iter.seek_to_last().unwrap();
    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.key().to_vec());
        iter.prev().unwrap();
    }
    assert_eq!(keys, vec![b"f".to_vec(), b"e".to_vec(), b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    iter.seek(b"c").unwrap();
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"b");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"b");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"c");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"d");
}
