use crate::error::Result;
use crate::iterator::{BoxedIterator, StorageIterator};

/// Turns an index entry's value into an iterator over the data it points at.
pub type BlockFunction = Box<dyn Fn(&[u8]) -> Result<BoxedIterator> + Send>;

/// Iterates an index whose values locate sorted runs, opening each run on
/// demand.
///
/// Used twice: a table's index block over its data blocks, and a level's
/// file list over its tables.
pub struct TwoLevelIterator {
    index_iter: BoxedIterator,
    block_fn: BlockFunction,
    data_iter: Option<BoxedIterator>,
    /// Index value that produced `data_iter`.
    data_handle: Vec<u8>,
}

impl TwoLevelIterator {
    pub fn new(index_iter: BoxedIterator, block_fn: BlockFunction) -> Self {
        TwoLevelIterator {
            index_iter,
            block_fn,
            data_iter: None,
            data_handle: Vec::new(),
        }
    }

    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.is_valid() {
            self.data_iter = None;
            return Ok(());
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_handle.as_slice() {
            return Ok(());
        }
        let iter = (self.block_fn)(handle)?;
        self.data_handle.clear();
        self.data_handle.extend_from_slice(handle);
        self.data_iter = Some(iter);
        Ok(())
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.is_valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(data) = self.data_iter.as_mut() {
                data.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_data_blocks_backward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.prev()?;
            self.init_data_block()?;
            if let Some(data) = self.data_iter.as_mut() {
                data.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for TwoLevelIterator {
    fn is_valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(data) = self.data_iter.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index_iter.seek_to_last()?;
        self.init_data_block()?;
        if let Some(data) = self.data_iter.as_mut() {
            data.seek_to_last()?;
        }
        self.skip_empty_data_blocks_backward()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.index_iter.seek(key)?;
        self.init_data_block()?;
        if let Some(data) = self.data_iter.as_mut() {
            data.seek(key)?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data) = self.data_iter.as_mut() {
            data.next()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(data) = self.data_iter.as_mut() {
            data.prev()?;
        }
        self.skip_empty_data_blocks_backward()
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[][..], |it| it.key())
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().map_or(&[][..], |it| it.value())
    }
}
