//! Crash-safe file replacement.
//!
//! Content is written to a `<name>.tmp` sibling, flushed to disk and then
//! renamed over the target, so readers observe either the old bytes or the
//! new bytes but never a partial file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Path of the temporary sibling used while replacing `target`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".tmp");
    target.with_file_name(name)
}

/// Replace `target` with the bytes produced by `write`.
///
/// If `write` or any later step fails, the temporary file is removed and
/// `target` is left as it was.
pub fn write_atomic_with<F>(target: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let temp = temp_path(target);
    let result = write_and_rename(target, &temp, write);
    if result.is_err() && temp.exists() {
        if let Err(e) = fs::remove_file(&temp) {
            log::warn!("Failed to remove temp file {}: {}", temp.display(), e);
        }
    }
    result
}

/// Replace `target` with `bytes`.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic_with(target, |writer| writer.write_all(bytes))
}

fn write_and_rename<F>(target: &Path, temp: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let mut writer = BufWriter::new(File::create(temp)?);
    write(&mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp, target)?;
    sync_parent(target);
    Ok(())
}

#[cfg(unix)]
fn sync_parent(target: &Path) {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        log::debug!("Could not fsync {}: {}", parent.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) {}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.xml");
        fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"new contents").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new contents");
        assert!(!temp_path(&target).exists());
    }

    #[test]
    fn test_failed_write_keeps_original() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.xml");
        fs::write(&target, b"original").unwrap();

        let result = write_atomic_with(&target, |writer| {
            writer.write_all(b"half of the new")?;
            Err(io::Error::other("simulated crash"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert!(!temp_path(&target).exists());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let target = Path::new("/a/b/database.xml");
        assert_eq!(temp_path(target), PathBuf::from("/a/b/database.xml.tmp"));
    }
}
