//! Sorted string tables in the LevelDB table format.
//!
//! ```text
//! [data block 1][trailer]
//! ...
//! [data block N][trailer]
//! [filter block][trailer]          (optional)
//! [meta-index block][trailer]      "filter.<policy>" -> filter handle
//! [index block][trailer]           separator key -> data block handle
//! [footer (48B)]
//! ```

pub mod block;
pub mod builder;
pub mod filter_block;
pub mod footer;
pub mod reader;

use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::cache::BlockCache;
use crate::comparator::Comparator;
use crate::options::CompressionType;

pub use builder::SSTableBuilder;
pub use reader::SSTable;

/// Everything a table needs to know to be written or read.
#[derive(Clone)]
pub struct TableOptions {
    /// Orders the keys stored in the table.
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    pub block_cache: Option<Arc<BlockCache>>,
}

impl TableOptions {
    /// No filter and no block cache, LevelDB default block geometry.
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        TableOptions {
            comparator,
            filter_policy: None,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::Snappy,
            block_cache: None,
        }
    }
}
