use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Multiset of pinned sequence numbers, shared between the database and every
/// outstanding snapshot handle.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    pinned: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(SnapshotList::default())
    }

    /// Register a snapshot at `sequence`.
    pub(crate) fn acquire(self: &Arc<Self>, sequence: SequenceNumber) -> Snapshot {
        *self.pinned.lock().entry(sequence).or_insert(0) += 1;
        Snapshot {
            inner: Arc::new(SnapshotInner {
                sequence,
                list: Arc::clone(self),
            }),
        }
    }

    fn release(&self, sequence: SequenceNumber) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&sequence);
            }
        }
    }

    /// Oldest sequence still pinned by a snapshot.
    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.pinned.lock().keys().next().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.pinned.lock().values().sum()
    }
}

struct SnapshotInner {
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

/// A consistent read horizon. Reads through a snapshot see exactly the
/// commits with sequence number `<=` the pinned value.
///
/// Cloning shares the same registration; the sequence is unpinned when the
/// last clone is dropped (or passed to `DB::release_snapshot`).
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.inner.sequence)
            .finish()
    }
}
