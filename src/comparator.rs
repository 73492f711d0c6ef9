use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::coding::{decode_fixed64, put_fixed64};
use crate::types::{MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK, extract_user_key, pack_sequence_and_type};

/// A total order over keys, injected at open time and persisted by name.
///
/// Reopening a database with a comparator whose `name` differs from the one
/// recorded in the manifest fails with `InvalidArgument`.
pub trait Comparator: Send + Sync {
    /// Three-way comparison.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Persisted identity of this ordering.
    fn name(&self) -> &str;

    /// If `start < limit`, may shorten `start` to a key in `[start, limit)`.
    /// Used to keep index blocks small. The default leaves `start` unchanged.
    fn find_shortest_separator(&self, _start: &mut Vec<u8>, _limit: &[u8]) {}

    /// May change `key` to a short key `>= key`. The default leaves it unchanged.
    fn find_short_successor(&self, _key: &mut Vec<u8>) {}
}

/// Unsigned lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let diff = start
            .iter()
            .zip(limit.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(min_len);

        if diff >= min_len {
            // One is a prefix of the other.
            return;
        }
        let byte = start[diff];
        if byte < 0xff && byte + 1 < limit[diff] {
            start[diff] += 1;
            start.truncate(diff + 1);
            debug_assert_eq!(self.compare(start.as_slice(), limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        if let Some(pos) = key.iter().position(|&b| b != 0xff) {
            key[pos] += 1;
            key.truncate(pos + 1);
        }
        // All 0xff: leave as is.
    }
}

/// Shared default comparator instance.
pub fn bytewise() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

/// Orders encoded internal keys: user key ascending under the wrapped user
/// comparator, then sequence number descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare_user_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => {
                let a_tag = decode_fixed64(&a[a.len() - 8..]);
                let b_tag = decode_fixed64(&b[b.len() - 8..]);
                b_tag.cmp(&a_tag)
            }
            ord => ord,
        }
    }

    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start.as_slice());
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len() && self.user.compare(user_start, &tmp) == Ordering::Less {
            // The user key got physically shorter but logically larger; tack
            // on the earliest possible trailer.
            put_fixed64(&mut tmp, pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));
            debug_assert_eq!(self.compare(start.as_slice(), &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key.as_slice());
        let mut tmp = user_key.to_vec();
        self.user.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len() && self.user.compare(user_key, &tmp) == Ordering::Less {
            put_fixed64(&mut tmp, pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));
            debug_assert_eq!(self.compare(key.as_slice(), &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}
