//! Adding audio files from disk to the database.

use std::fs;
use std::path::{Path, PathBuf};

use crate::database::VdjDatabase;
use crate::error::Result;
use crate::types::is_audio_path;

/// Counts from [`import_files`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    /// Already in the database.
    pub skipped: usize,
    /// Unreadable or non-UTF-8 paths.
    pub failed: usize,
}

/// Check if a file has a supported audio extension.
pub fn is_supported_audio_file(path: &Path) -> bool {
    path.to_str().is_some_and(is_audio_path)
}

/// List audio files in a directory, sorted by path.
pub fn scan_directory<P: AsRef<Path>>(path: P, recursive: bool) -> Vec<PathBuf> {
    let path = path.as_ref();
    log::info!("Scanning directory: {:?} (recursive: {})", path, recursive);

    let mut files = Vec::new();
    collect_audio_files(path, recursive, &mut files);
    files.sort();

    log::info!("Found {} audio files in {:?}", files.len(), path);
    files
}

fn collect_audio_files(path: &Path, recursive: bool, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read {:?}: {}", path, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            if recursive {
                collect_audio_files(&entry_path, true, files);
            }
        } else if is_supported_audio_file(&entry_path) {
            files.push(entry_path);
        }
    }
}

/// Add every path that is not yet in the database, recording its size.
pub fn import_files<P: AsRef<Path>>(db: &mut VdjDatabase, paths: &[P]) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for path in paths {
        let path = path.as_ref();
        let Some(file_path) = path.to_str() else {
            log::warn!("Skipping non UTF-8 path: {:?}", path);
            summary.failed += 1;
            continue;
        };

        if db.contains(file_path)? {
            log::debug!("Already in database: {}", file_path);
            summary.skipped += 1;
            continue;
        }

        let file_size = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                log::warn!("Cannot read {}: {}", file_path, e);
                summary.failed += 1;
                continue;
            }
        };

        db.add_song(file_path, Some(file_size))?;
        summary.added += 1;
    }

    log::info!(
        "Imported {} file(s), {} already present, {} failed",
        summary.added,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_is_supported_audio_file() {
        assert!(is_supported_audio_file(Path::new("/path/to/song.mp3")));
        assert!(is_supported_audio_file(Path::new("/path/to/song.MP3")));
        assert!(is_supported_audio_file(Path::new("/path/to/song.aif")));
        assert!(!is_supported_audio_file(Path::new("/path/to/cover.jpg")));
        assert!(!is_supported_audio_file(Path::new("/path/to/song")));
    }

    #[test]
    fn test_scan_directory() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("b.mp3"), b"b").unwrap();
        fs::write(dir.path().join("a.flac"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        fs::write(sub.join("c.wav"), b"c").unwrap();

        let flat = scan_directory(dir.path(), false);
        assert_eq!(
            flat,
            vec![dir.path().join("a.flac"), dir.path().join("b.mp3")]
        );

        let deep = scan_directory(dir.path(), true);
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&sub.join("c.wav")));

        assert!(scan_directory(dir.path().join("missing"), true).is_empty());
    }

    #[test]
    fn test_import_is_add_if_new() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        fs::write(&a, b"12345").unwrap();
        fs::write(&b, b"12").unwrap();

        let mut db = VdjDatabase::create_empty(dir.path().join("database.xml"));
        let summary = import_files(&mut db, &[&a]).unwrap();
        assert_eq!(summary.added, 1);

        let missing = dir.path().join("missing.mp3");
        let summary = import_files(&mut db, &[&a, &b, &missing]).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                added: 1,
                skipped: 1,
                failed: 1
            }
        );

        let song = db.get_song(b.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(song.file_size, Some(2));
        assert_eq!(db.len().unwrap(), 2);
    }
}
