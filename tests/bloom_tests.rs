// Bloom filter policy in the builtin LevelDB filter format.

use std::sync::Arc;

use lsm_kv::bloom::{BloomFilterPolicy, FilterPolicy, InternalFilterPolicy};
use lsm_kv::types::{InternalKey, ValueType};

fn build(policy: &dyn FilterPolicy, keys: &[Vec<u8>]) -> Vec<u8> {
    let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
    let mut filter = Vec::new();
    policy.create_filter(&refs, &mut filter);
    filter
}

fn int_key(i: u32) -> Vec<u8> {
    i.to_le_bytes().to_vec()
}

// =============================================================================
// Test 1: A filter over no keys matches nothing
// =============================================================================
#[test]
fn empty_filter_rejects_keys() {
    let policy = BloomFilterPolicy::new(10);
    let filter = build(&policy, &[]);
    assert!(!policy.key_may_match(b"hello", &filter));
    assert!(!policy.key_may_match(b"", &filter));
}

// =============================================================================
// Test 2: Small filter, no false negatives
// =============================================================================
#[test]
fn small_filter_matches_inserted_keys() {
    let policy = BloomFilterPolicy::new(10);
    let filter = build(&policy, &[b"hello".to_vec(), b"world".to_vec()]);
    assert!(policy.key_may_match(b"hello", &filter));
    assert!(policy.key_may_match(b"world", &filter));
    assert!(!policy.key_may_match(b"x", &filter));
    assert!(!policy.key_may_match(b"foo", &filter));
}

// =============================================================================
// Test 3: Filter length and false positive rate across sizes
// =============================================================================
#[test]
fn varying_lengths_keep_false_positives_low() {
    let policy = BloomFilterPolicy::new(10);
    let mut mediocre = 0;
    let mut good = 0;
    let mut length = 1u32;
    while length <= 10_000 {
        let keys: Vec<Vec<u8>> = (0..length).map(int_key).collect();
        let filter = build(&policy, &keys);
        assert!(filter.len() <= (length as usize * 10 / 8) + 40, "length {length}");

        for key in &keys {
            assert!(policy.key_may_match(key, &filter), "length {length}");
        }

        let false_positives = (0..10_000u32)
            .filter(|i| policy.key_may_match(&int_key(i + 1_000_000_000), &filter))
            .count();
        let rate = false_positives as f64 / 10_000.0;
        assert!(rate <= 0.02, "length {length} rate {rate}");
        if rate > 0.0125 {
            mediocre += 1;
        } else {
            good += 1;
        }

        length = if length < 10 {
            length + 1
        } else if length < 100 {
            length + 10
        } else if length < 1000 {
            length + 100
        } else {
            length + 1000
        };
    }
    assert!(mediocre <= good / 5, "{mediocre} mediocre vs {good} good filters");
}

// =============================================================================
// Test 4: Probe count byte trails the bit array
// =============================================================================
#[test]
fn filter_records_probe_count() {
    let policy = BloomFilterPolicy::new(10);
    let filter = build(&policy, &[b"k".to_vec()]);
    // 64-bit minimum array plus one byte for the probe count (10 * 0.69).
    assert_eq!(filter.len(), 9);
    assert_eq!(filter[8], 6);
    assert_eq!(policy.name(), "leveldb.BuiltinBloomFilter2");
}

// =============================================================================
// Test 5: Internal-key adapter filters on the user key only
// =============================================================================
#[test]
fn internal_policy_ignores_sequence_and_type() {
    let policy = InternalFilterPolicy::new(Arc::new(BloomFilterPolicy::new(10)));
    let stored = InternalKey::new(b"user", 42, ValueType::Put).encode();
    let filter = build(&policy, &[stored]);

    let probe = InternalKey::new(b"user", 7, ValueType::Delete).encode();
    assert!(policy.key_may_match(&probe, &filter));
    let other = InternalKey::new(b"other", 42, ValueType::Put).encode();
    assert!(!policy.key_may_match(&other, &filter));
    assert_eq!(policy.name(), "leveldb.BuiltinBloomFilter2");
}
