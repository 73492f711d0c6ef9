//! The manifest: version edits, immutable versions, and the version set
//! that persists them.

pub mod edit;
pub mod version;
pub mod version_set;

pub use edit::{NewFile, VersionEdit};
pub use version::{FileMetaData, SeekStats, Version};
pub use version_set::VersionSet;
