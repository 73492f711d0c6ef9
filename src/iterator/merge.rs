use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{BoxedIterator, StorageIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Heap slot: a copy of a child's current key plus its index.
struct HeapEntry {
    key: Vec<u8>,
    child: usize,
    cmp: Arc<dyn Comparator>,
    direction: Direction,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// BinaryHeap is a max-heap. Forward pops the smallest key, reverse the
    /// largest; ties go to the lower child index (the newer source).
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = self.cmp.compare(&self.key, &other.key);
        let by_key = match self.direction {
            Direction::Forward => by_key.reverse(),
            Direction::Reverse => by_key,
        };
        by_key.then_with(|| other.child.cmp(&self.child))
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Yields every entry of every child; entries with equal keys come out in
/// child order. Deduplication and tombstone handling belong to the caller.
///
/// Children are ordered by priority: index 0 = newest (memtable),
/// higher indices = older (deeper SSTable levels).
pub struct MergeIterator {
    children: Vec<BoxedIterator>,
    heap: BinaryHeap<HeapEntry>,
    cmp: Arc<dyn Comparator>,
    current: Option<usize>,
    direction: Direction,
}

impl MergeIterator {
    /// Create a new MergeIterator from multiple sorted sources. Starts
    /// unpositioned.
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<BoxedIterator>) -> Self {
        MergeIterator {
            heap: BinaryHeap::with_capacity(children.len()),
            children,
            cmp,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn entry_for(&self, child: usize) -> HeapEntry {
        HeapEntry {
            key: self.children[child].key().to_vec(),
            child,
            cmp: Arc::clone(&self.cmp),
            direction: self.direction,
        }
    }

    /// Rebuild the heap from every valid child.
    fn rebuild(&mut self, direction: Direction) {
        self.direction = direction;
        self.heap.clear();
        for child in 0..self.children.len() {
            if self.children[child].is_valid() {
                let entry = self.entry_for(child);
                self.heap.push(entry);
            }
        }
        self.current = self.heap.peek().map(|e| e.child);
    }

    /// Replace the top of the heap with the current child's new position.
    fn advance_top(&mut self) {
        self.heap.pop();
        if let Some(child) = self.current {
            if self.children[child].is_valid() {
                let entry = self.entry_for(child);
                self.heap.push(entry);
            }
        }
        self.current = self.heap.peek().map(|e| e.child);
    }
}

impl StorageIterator for MergeIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.rebuild(Direction::Forward);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.rebuild(Direction::Reverse);
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(key)?;
        }
        self.rebuild(Direction::Forward);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };
        // Every non-current child must sit after key(); after moving backward
        // they sit before it, so reposition them.
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                    child.next()?;
                }
            }
            self.rebuild(Direction::Forward);
            // Ties put the current child first, so it is still the top.
            self.current = Some(current);
        }
        self.children[current].next()?;
        self.advance_top();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };
        // Every non-current child must sit before key().
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() {
                    child.prev()?;
                } else {
                    child.seek_to_last()?;
                }
            }
            self.rebuild(Direction::Reverse);
            self.current = Some(current);
        }
        self.children[current].prev()?;
        self.advance_top();
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.current.map_or(&[][..], |c| self.children[c].key())
    }

    fn value(&self) -> &[u8] {
        self.current.map_or(&[][..], |c| self.children[c].value())
    }
}
