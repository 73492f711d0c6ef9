//! Names of the files that make up a database directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    DbLock,
    Table,
    Descriptor,
    Current,
    Temp,
    InfoLog,
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.ldb"))
}

/// Table name used by older writers. Only read, never written.
pub fn sst_table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn descriptor_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn lock_file_name(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.dbtmp"))
}

/// Classify a file name found in a database directory.
///
/// ```text
///   CURRENT, LOCK, LOG, LOG.old
///   MANIFEST-<number>
///   <number>.(log|ldb|sst|dbtmp)
/// ```
pub fn parse_file_name(name: &str) -> Option<(u64, FileType)> {
    match name {
        "CURRENT" => return Some((0, FileType::Current)),
        "LOCK" => return Some((0, FileType::DbLock)),
        "LOG" | "LOG.old" => return Some((0, FileType::InfoLog)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (n, FileType::Descriptor));
    }
    let (number, suffix) = name.split_once('.')?;
    let number = parse_number(number)?;
    let file_type = match suffix {
        "log" => FileType::Log,
        "ldb" | "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((number, file_type))
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Point CURRENT at `MANIFEST-<descriptor_number>`, atomically via a temp file.
pub fn set_current_file(dir: &Path, descriptor_number: u64) -> Result<()> {
    let contents = format!("MANIFEST-{descriptor_number:06}\n");
    let tmp = temp_file_name(dir, descriptor_number);
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_name(dir))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Name of the manifest that CURRENT points at.
pub fn read_current_file(dir: &Path) -> Result<String> {
    let contents = fs::read_to_string(current_file_name(dir))?;
    match contents.strip_suffix('\n') {
        Some(name) if !name.is_empty() && !name.contains('\n') => Ok(name.to_string()),
        _ => Err(Error::corruption("CURRENT file does not end with newline")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_names() {
        assert_eq!(parse_file_name("100.log"), Some((100, FileType::Log)));
        assert_eq!(parse_file_name("000123.ldb"), Some((123, FileType::Table)));
        assert_eq!(parse_file_name("7.sst"), Some((7, FileType::Table)));
        assert_eq!(parse_file_name("MANIFEST-000002"), Some((2, FileType::Descriptor)));
        assert_eq!(parse_file_name("CURRENT"), Some((0, FileType::Current)));
        assert_eq!(parse_file_name("LOCK"), Some((0, FileType::DbLock)));
        assert_eq!(parse_file_name("000009.dbtmp"), Some((9, FileType::Temp)));
    }

    #[test]
    fn reject_unknown_names() {
        for name in ["", "foo", "foo-dx-100.log", ".log", "MANIFEST", "MANIFEST-", "100", "100.", "100.lop", "-1.log"] {
            assert_eq!(parse_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn formatted_names() {
        let dir = Path::new("/db");
        assert_eq!(log_file_name(dir, 5), Path::new("/db/000005.log"));
        assert_eq!(table_file_name(dir, 12), Path::new("/db/000012.ldb"));
        assert_eq!(descriptor_file_name(dir, 1), Path::new("/db/MANIFEST-000001"));
    }
}
