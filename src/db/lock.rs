use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::Result;

/// Exclusive advisory lock on a database's `LOCK` file, held until dropped.
///
/// The OS releases the lock when the handle is closed, including when the
/// process dies, so a stale `LOCK` file never blocks a later open.
#[derive(Debug)]
pub(crate) struct DbLock {
    _file: File,
    path: PathBuf,
}

impl DbLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let acquired = file.try_lock_exclusive().map_err(|e| {
            io::Error::new(e.kind(), format!("lock {}: {e}", path.display()))
        })?;
        if !Acquired::acquired(acquired) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("lock {}: already held by another process", path.display()),
            )
            .into());
        }
        Ok(DbLock {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// `try_lock_exclusive` reports contention either as an error or as
/// `Ok(false)` depending on the fs4 release.
trait Acquired {
    fn acquired(self) -> bool;
}

impl Acquired for () {
    fn acquired(self) -> bool {
        true
    }
}

impl Acquired for bool {
    fn acquired(self) -> bool {
        self
    }
}
