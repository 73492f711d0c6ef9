//! # lsm-kv
//!
//! An embeddable, ordered, persistent key-value engine built on a
//! Log-Structured Merge-Tree. Files are laid out in the LevelDB on-disk
//! format: write-ahead logs, sorted tables, a manifest and `CURRENT`.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! Random writes become sequential writes; reads consult the memtables
//! first and then each level of tables, newest data first.
//!
//! ```no_run
//! use lsm_kv::{DB, Options, ReadOptions, WriteOptions};
//!
//! let options = Options { create_if_missing: true, ..Options::default() };
//! let db = DB::open("/tmp/lsm-kv-demo", options)?;
//! db.put(&WriteOptions::default(), b"hello", b"world")?;
//! assert_eq!(db.get(&ReadOptions::default(), b"hello")?, Some(b"world".to_vec()));
//! # Ok::<(), lsm_kv::Error>(())
//! ```

pub mod bloom;
pub mod cache;
pub mod checksum;
pub mod coding;
pub mod compaction;
pub mod comparator;
pub mod db;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod options;
pub mod snapshot;
pub mod sstable;
pub mod types;
pub mod wal;
pub mod write_batch;

// Public re-exports for the top-level API
pub use comparator::{BytewiseComparator, Comparator};
pub use db::{CompactionStats, DB, DBIterator, Entries, LevelStats, Stats, destroy_db};
pub use error::{Error, Result};
pub use iterator::StorageIterator;
pub use options::{CompressionType, Options, ReadOptions, WriteOptions};
pub use snapshot::Snapshot;
pub use write_batch::{BatchOp, WriteBatch};
