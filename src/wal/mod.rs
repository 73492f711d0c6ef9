//! Write-ahead log in the LevelDB log format.
//!
//! The same physical format carries WriteBatch records in `<n>.log` files and
//! VersionEdit records in `MANIFEST-<n>` files.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::LogReader;
pub use record::{BLOCK_SIZE, HEADER_SIZE, RecordType};
pub use writer::LogWriter;
