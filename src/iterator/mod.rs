pub mod merge;
pub mod two_level;

use crate::error::Result;

pub use merge::MergeIterator;
pub use two_level::TwoLevelIterator;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (skip list, block, SSTable, level, merged view)
/// implements this trait. This enables composability: MergeIterator takes
/// `Vec<BoxedIterator>` and merges them.
///
/// Positioning methods return errors from the underlying source (IO failure,
/// corrupt block). After an error the iterator is invalid.
pub trait StorageIterator: Send {
    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Positions at the first entry of the source.
    fn seek_to_first(&mut self) -> Result<()>;

    /// Positions at the last entry of the source.
    fn seek_to_last(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Advances to the next entry. Requires `is_valid()`.
    fn next(&mut self) -> Result<()>;

    /// Moves to the previous entry. Requires `is_valid()`.
    fn prev(&mut self) -> Result<()>;

    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];
}

pub type BoxedIterator = Box<dyn StorageIterator>;

/// A source with no entries.
#[derive(Debug, Default)]
pub struct EmptyIterator;

impl StorageIterator for EmptyIterator {
    fn is_valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &[]
    }

    fn value(&self) -> &[u8] {
        &[]
    }
}
