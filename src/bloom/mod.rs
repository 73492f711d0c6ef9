use crate::coding::decode_fixed32;
use crate::types::extract_user_key;

/// Builds and probes compact summaries of a set of keys, stored per table in
/// the filter block. The policy name is written into the table so a reader
/// never applies a filter built by a different policy.
pub trait FilterPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Append a filter summarizing `keys` to `dst`.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true if `key` was in the key list the filter was built
    /// from. May return true for other keys, but should aim for false.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any probed bit is 0 → key is DEFINITELY NOT in the set
/// - If all probed bits are 1 → key is PROBABLY in the set
///
/// Sizing:
///   num_probes = bits_per_key * ln(2), clamped to [1, 30]
///   10 bits/key → ~1% false positive rate
///
/// Hash trick: don't need k independent hash functions.
/// Use double hashing: h_i = h + i * delta, where delta is h rotated by 17.
///
/// The filter layout and hash are those of `leveldb.BuiltinBloomFilter2`,
/// so filters written by other engines of the family remain usable.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_probes: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        // 0.69 =~ ln(2). Intentionally rounds down to reduce probing cost.
        let num_probes = ((bits_per_key as f64) * 0.69) as usize;
        BloomFilterPolicy {
            bits_per_key,
            num_probes: num_probes.clamp(1, 30),
        }
    }

    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "leveldb.BuiltinBloomFilter2"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // For small n, we can see a very high false positive rate. Fix it by
        // enforcing a minimum bloom filter length.
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = bytes * 8;

        let init = dst.len();
        dst.resize(init + bytes, 0);
        dst.push(self.num_probes as u8);
        let array = &mut dst[init..init + bytes];

        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.num_probes {
                let bit_pos = (h as usize) % bits;
                array[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bytes = filter.len() - 1;
        let bits = bytes * 8;

        let num_probes = filter[bytes] as usize;
        if num_probes > 30 {
            // Reserved for potentially new encodings for short bloom filters.
            // Consider it a match.
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..num_probes {
            let bit_pos = (h as usize) % bits;
            if filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

/// Adapts a user-key filter policy to tables that store internal keys: the
/// filter is built from and probed with the user-key portion only.
pub struct InternalFilterPolicy<P: ?Sized> {
    user_policy: std::sync::Arc<P>,
}

impl<P: FilterPolicy + ?Sized> InternalFilterPolicy<P> {
    pub fn new(user_policy: std::sync::Arc<P>) -> Self {
        InternalFilterPolicy { user_policy }
    }
}

impl<P: FilterPolicy + ?Sized> FilterPolicy for InternalFilterPolicy<P> {
    fn name(&self) -> &str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let user_keys: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&user_keys, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}

fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, 0xbc9f_1d34)
}

/// Murmur-like hash shared by the on-disk bloom filter format.
pub(crate) fn hash(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4_a793;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = decode_fixed32(chunk);
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    if rest.len() == 3 {
        h = h.wrapping_add((rest[2] as u32) << 16);
    }
    if rest.len() >= 2 {
        h = h.wrapping_add((rest[1] as u32) << 8);
    }
    if !rest.is_empty() {
        h = h.wrapping_add(rest[0] as u32);
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_values() {
        let seed = 0xbc9f_1d34;
        assert_eq!(hash(&[], seed), 0xbc9f_1d34);
        assert_eq!(hash(&[0x62], seed), 0xef13_45c4);
        assert_eq!(hash(&[0xc3, 0x97], seed), 0x5b66_3814);
        assert_eq!(hash(&[0xe2, 0x99, 0xa5], seed), 0x323c_078f);
        assert_eq!(hash(&[0xe1, 0x80, 0xb9, 0x32], seed), 0xed21_633a);
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let policy = BloomFilterPolicy::new(10);
        let mut filter = Vec::new();
        policy.create_filter(&[], &mut filter);
        assert!(!policy.key_may_match(b"hello", &filter));
        assert!(!policy.key_may_match(b"world", &filter));
    }

    #[test]
    fn small_filter() {
        let policy = BloomFilterPolicy::new(10);
        let mut filter = Vec::new();
        policy.create_filter(&[b"hello", b"world"], &mut filter);
        assert!(policy.key_may_match(b"hello", &filter));
        assert!(policy.key_may_match(b"world", &filter));
        assert!(!policy.key_may_match(b"x", &filter));
        assert!(!policy.key_may_match(b"foo", &filter));
    }
}
