use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// A missing key is not an error: reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// A file or other named resource does not exist.
    #[error("NotFound: {0}")]
    NotFound(String),
    /// Data corruption detected (CRC mismatch, bad format, missing table, etc).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Caller supplied options or arguments that cannot be honoured.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Requested feature is not available in this build.
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }

    /// Duplicate an error so it can be latched and reported more than once.
    /// IO errors keep their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Error::NotFound(m) => Error::NotFound(m.clone()),
            Error::Corruption(m) => Error::Corruption(m.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::NotSupported(m) => Error::NotSupported(m.clone()),
        }
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
