use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;

use crate::comparator::Comparator;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Fixed bookkeeping charged per node on top of key and value bytes.
const NODE_OVERHEAD: usize = 32;

/// Index of the head sentinel in the node arena.
const HEAD: usize = 0;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
struct SkipNode {
    key: Bytes,
    value: Bytes,
    forward: Vec<Option<usize>>, // indices into SkipList.nodes
}

/// A probabilistic sorted data structure over an index arena.
///
/// Nodes are only ever appended to the arena, so a node index stays valid
/// for the lifetime of the list. Cursors hold indices rather than
/// references, which lets them survive concurrent inserts made under a
/// write lock.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    cmp: Arc<dyn Comparator>,
}

impl SkipList {
    pub fn with_comparator(cmp: Arc<dyn Comparator>) -> Self {
        let head = SkipNode {
            key: Bytes::new(),
            value: Bytes::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            cmp,
        }
    }

    /// Insert a key-value pair. Keys are unique: the memtable encodes a fresh
    /// sequence number into every key, so existing nodes are never touched.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node
    ///   3. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut update = [HEAD; MAX_HEIGHT];
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, &key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
            update[level] = x;
        }

        debug_assert!(
            self.nodes[x].forward[0]
                .is_none_or(|next| self.cmp.compare(&self.nodes[next].key, &key) != Ordering::Equal),
            "duplicate skip list key"
        );

        let height = self.random_height();
        if height > self.height {
            for slot in update.iter_mut().take(height).skip(self.height) {
                *slot = HEAD;
            }
            self.height = height;
        }

        let idx = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[update[level]].forward[level];
            self.nodes[update[level]].forward[level] = Some(idx);
        }

        self.size_bytes += key.len() + value.len() + NODE_OVERHEAD + height * 8;
        self.nodes.push(SkipNode {
            key: Bytes::from(key),
            value: Bytes::from(value),
            forward,
        });
        self.len += 1;
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// First node whose key is >= `key`.
    pub(crate) fn find_greater_or_equal(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            let next = self.nodes[x].forward[level];
            match next {
                Some(n) if self.cmp.compare(&self.nodes[n].key, key) == Ordering::Less => x = n,
                _ => {
                    if level == 0 {
                        return next;
                    }
                    level -= 1;
                }
            }
        }
    }

    /// Last node whose key is < `key`.
    pub(crate) fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) if self.cmp.compare(&self.nodes[n].key, key) == Ordering::Less => x = n,
                _ => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    pub(crate) fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) => x = n,
                None => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    pub(crate) fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub(crate) fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    pub(crate) fn entry(&self, idx: usize) -> (&Bytes, &Bytes) {
        let node = &self.nodes[idx];
        (&node.key, &node.value)
    }

    /// Each extra level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    /// Higher branching factor = fewer levels = less memory.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, 4) {
            height += 1;
        }
        height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;
    use rand::seq::SliceRandom;

    fn keys(list: &SkipList) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut node = list.first();
        while let Some(idx) = node {
            out.push(list.entry(idx).0.to_vec());
            node = list.next_of(idx);
        }
        out
    }

    fn key_at(list: &SkipList, node: Option<usize>) -> Option<&[u8]> {
        node.map(|idx| &list.entry(idx).0[..])
    }

    #[test]
    fn shuffled_inserts_come_out_sorted() {
        let mut order: Vec<u32> = (0..1000).collect();
        order.shuffle(&mut rand::thread_rng());
        let mut list = SkipList::with_comparator(bytewise());
        for i in &order {
            list.insert(format!("key_{i:05}").into_bytes(), i.to_be_bytes().to_vec());
        }
        assert_eq!(list.len(), 1000);
        let expected: Vec<Vec<u8>> = (0..1000u32).map(|i| format!("key_{i:05}").into_bytes()).collect();
        assert_eq!(keys(&list), expected);
    }

    #[test]
    fn searches_between_and_past_keys() {
        let mut list = SkipList::with_comparator(bytewise());
        for key in [b"b", b"d", b"f"] {
            list.insert(key.to_vec(), Vec::new());
        }
        assert_eq!(key_at(&list, list.find_greater_or_equal(b"a")), Some(&b"b"[..]));
        assert_eq!(key_at(&list, list.find_greater_or_equal(b"d")), Some(&b"d"[..]));
        assert_eq!(key_at(&list, list.find_greater_or_equal(b"e")), Some(&b"f"[..]));
        assert_eq!(list.find_greater_or_equal(b"g"), None);

        assert_eq!(list.find_less_than(b"b"), None);
        assert_eq!(key_at(&list, list.find_less_than(b"e")), Some(&b"d"[..]));
        assert_eq!(key_at(&list, list.find_less_than(b"z")), Some(&b"f"[..]));
        assert_eq!(key_at(&list, list.find_last()), Some(&b"f"[..]));
    }

    #[test]
    fn empty_list_has_no_nodes() {
        let list = SkipList::with_comparator(bytewise());
        assert!(list.is_empty());
        assert_eq!(list.size_bytes(), 0);
        assert_eq!(list.first(), None);
        assert_eq!(list.find_last(), None);
        assert_eq!(list.find_greater_or_equal(b""), None);
    }

    #[test]
    fn size_grows_with_each_entry() {
        let mut list = SkipList::with_comparator(bytewise());
        list.insert(b"key".to_vec(), vec![0u8; 100]);
        let first = list.size_bytes();
        assert!(first >= 103);
        list.insert(b"other".to_vec(), vec![0u8; 10]);
        assert!(list.size_bytes() >= first + 15);
    }

    struct Reverse;

    impl Comparator for Reverse {
        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            b.cmp(a)
        }

        fn name(&self) -> &str {
            "test.Reverse"
        }
    }

    #[test]
    fn comparator_decides_order() {
        let mut list = SkipList::with_comparator(Arc::new(Reverse));
        for key in [b"b", b"a", b"c"] {
            list.insert(key.to_vec(), key.to_vec());
        }
        assert_eq!(keys(&list), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    #[should_panic(expected = "duplicate skip list key")]
    #[cfg(debug_assertions)]
    fn duplicate_key_is_rejected() {
        let mut list = SkipList::with_comparator(bytewise());
        list.insert(b"key".to_vec(), b"old".to_vec());
        list.insert(b"key".to_vec(), b"new".to_vec());
    }
}
