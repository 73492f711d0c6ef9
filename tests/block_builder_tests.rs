// Block builder: prefix compression, restart points, and size estimates.

use lsm_kv::coding::{decode_fixed32, get_varint32};
use lsm_kv::sstable::block::BlockBuilder;

fn num_restarts(block: &[u8]) -> u32 {
    decode_fixed32(&block[block.len() - 4..])
}

// =============================================================================
// Test 1: Empty block holds one restart point and its count
// =============================================================================
#[test]
fn empty_block_layout() {
    let mut builder = BlockBuilder::new(16);
    assert!(builder.is_empty());
    assert_eq!(builder.estimated_size(), 8);
    let block = builder.finish();
    assert_eq!(block, vec![0, 0, 0, 0, 1, 0, 0, 0]);
}

// =============================================================================
// Test 2: Shared prefixes are elided between entries
// =============================================================================
#[test]
fn second_entry_shares_prefix() {
    let mut builder = BlockBuilder::new(16);
    builder.add(b"apple", b"1");
    builder.add(b"applesauce", b"2");
    let block = builder.finish();

    let mut input = &block[..];
    assert_eq!(get_varint32(&mut input), Some(0));
    assert_eq!(get_varint32(&mut input), Some(5));
    assert_eq!(get_varint32(&mut input), Some(1));
    assert_eq!(&input[..6], b"apple1");
    input = &input[6..];
    assert_eq!(get_varint32(&mut input), Some(5));
    assert_eq!(get_varint32(&mut input), Some(5));
    assert_eq!(get_varint32(&mut input), Some(1));
    assert_eq!(&input[..6], b"sauce2");
}

// =============================================================================
// Test 3: A restart point every N entries stores the full key
// =============================================================================
#[test]
fn restart_interval_controls_restart_count() {
    let mut builder = BlockBuilder::new(4);
    for i in 0..10 {
        builder.add(format!("key{i:02}").as_bytes(), b"v");
    }
    assert_eq!(builder.last_key(), b"key09");
    let block = builder.finish();
    assert_eq!(num_restarts(&block), 3);

    // Restart offsets are increasing and the second one decodes with shared == 0.
    let base = block.len() - 4 - 3 * 4;
    let offsets: Vec<usize> = (0..3)
        .map(|i| decode_fixed32(&block[base + i * 4..]) as usize)
        .collect();
    assert_eq!(offsets[0], 0);
    assert!(offsets[0] < offsets[1] && offsets[1] < offsets[2]);
    let mut at_restart = &block[offsets[1]..];
    assert_eq!(get_varint32(&mut at_restart), Some(0));
}

// =============================================================================
// Test 4: Estimated size matches the finished block
// =============================================================================
#[test]
fn estimated_size_is_exact() {
    let mut builder = BlockBuilder::new(16);
    for i in 0..100 {
        builder.add(format!("user{i:04}").as_bytes(), &[7u8; 20]);
    }
    let estimate = builder.estimated_size();
    let block = builder.finish();
    assert_eq!(block.len(), estimate);
}

// =============================================================================
// Test 5: finish resets the builder for reuse
// =============================================================================
#[test]
fn finish_resets_builder() {
    let mut builder = BlockBuilder::new(16);
    builder.add(b"first", b"1");
    let first = builder.finish();
    assert!(builder.is_empty());
    assert!(builder.last_key().is_empty());

    builder.add(b"first", b"1");
    assert_eq!(builder.finish(), first);
}
