//! Finding entries whose files are missing or are not audio.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::database::VdjDatabase;
use crate::error::Result;
use crate::types::{is_audio_path, is_non_audio_path, Song};

/// Bucket an entry falls into during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    AudioExists,
    AudioMissing,
    NonAudio,
    WindowsPath,
    Netsearch,
    /// Neither a known audio nor a known non-audio extension.
    Unknown,
}

/// Check if a local entry's file exists. Windows and streaming paths never
/// do on this machine.
pub fn file_exists(file_path: &str) -> bool {
    let bytes = file_path.as_bytes();
    if bytes.len() > 1 && bytes[1] == b':' {
        return false;
    }
    if file_path.contains("://") {
        return false;
    }
    Path::new(file_path).exists()
}

pub fn categorize(song: &Song) -> EntryCategory {
    if song.is_netsearch() {
        EntryCategory::Netsearch
    } else if song.is_windows_path() {
        EntryCategory::WindowsPath
    } else if is_non_audio_path(&song.file_path) {
        EntryCategory::NonAudio
    } else if is_audio_path(&song.file_path) {
        if file_exists(&song.file_path) {
            EntryCategory::AudioExists
        } else {
            EntryCategory::AudioMissing
        }
    } else {
        EntryCategory::Unknown
    }
}

/// Local entries whose file is gone.
pub fn find_missing_files<'a, I>(songs: I) -> Vec<&'a Song>
where
    I: IntoIterator<Item = &'a Song>,
{
    songs
        .into_iter()
        .filter(|song| song.is_local() && !file_exists(&song.file_path))
        .collect()
}

/// Entries that are not audio: known clutter plus unknown extensions.
/// Streaming entries are never included.
pub fn find_non_audio_entries<'a, I>(songs: I) -> Vec<&'a Song>
where
    I: IntoIterator<Item = &'a Song>,
{
    songs
        .into_iter()
        .filter(|song| !song.is_netsearch())
        .filter(|song| is_non_audio_path(&song.file_path) || !is_audio_path(&song.file_path))
        .collect()
}

/// Summary of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub audio_valid: usize,
    pub audio_missing: usize,
    pub non_audio: usize,
    pub windows_paths: usize,
    pub netsearch: usize,
    pub unknown: usize,
    /// Extension counts, most common first. Entries without one count as
    /// `(none)`.
    pub extensions: Vec<(String, usize)>,
    /// Windows entries per drive letter.
    pub windows_drives: BTreeMap<String, usize>,
    pub missing_files: Vec<String>,
    pub non_audio_files: Vec<String>,
}

/// Categorize every entry. Checks local audio files on disk.
pub fn validate<'a, I>(songs: I) -> ValidationReport
where
    I: IntoIterator<Item = &'a Song>,
{
    let mut report = ValidationReport::default();
    let mut extensions: BTreeMap<String, usize> = BTreeMap::new();

    for song in songs {
        report.total += 1;

        let extension = song.extension();
        let extension = if extension.is_empty() {
            "(none)".to_string()
        } else {
            extension
        };
        *extensions.entry(extension).or_default() += 1;

        match categorize(song) {
            EntryCategory::AudioExists => report.audio_valid += 1,
            EntryCategory::AudioMissing => {
                report.audio_missing += 1;
                report.missing_files.push(song.file_path.clone());
            }
            EntryCategory::NonAudio => {
                report.non_audio += 1;
                report.non_audio_files.push(song.file_path.clone());
            }
            EntryCategory::WindowsPath => {
                report.windows_paths += 1;
                let drive = song
                    .file_path
                    .chars()
                    .next()
                    .map(|c| c.to_ascii_uppercase().to_string())
                    .unwrap_or_else(|| "?".to_string());
                *report.windows_drives.entry(drive).or_default() += 1;
            }
            EntryCategory::Netsearch => report.netsearch += 1,
            EntryCategory::Unknown => report.unknown += 1,
        }
    }

    report.extensions = extensions.into_iter().collect();
    report.extensions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    log::info!(
        "Validated {} entries: {} valid, {} missing, {} non-audio",
        report.total,
        report.audio_valid,
        report.audio_missing,
        report.non_audio
    );
    report
}

/// Remove the given entries. Returns how many were present.
pub fn remove_entries<S: AsRef<str>>(db: &mut VdjDatabase, file_paths: &[S]) -> Result<usize> {
    let mut removed = 0;
    for path in file_paths {
        if db.remove_song(path.as_ref())? {
            removed += 1;
        }
    }
    log::info!("Removed {} of {} entries", removed, file_paths.len());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, VdjDatabase, String) {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present.mp3");
        fs::write(&present, b"audio").unwrap();
        let present = present.to_str().unwrap().to_string();

        let mut db = VdjDatabase::create_empty(dir.path().join("database.xml"));
        for path in [
            present.as_str(),
            "/nowhere/missing.flac",
            "/nowhere/pack.zip",
            "/nowhere/notes.xyz",
            "D:\\Music\\a.mp3",
            "d:/Music/b.mp3",
            "E:\\c.mp3",
            "netsearch://dz123",
        ] {
            db.add_song(path, None).unwrap();
        }
        (dir, db, present)
    }

    #[test]
    fn test_file_exists_skips_foreign_paths() {
        let (_dir, _db, present) = setup();
        assert!(file_exists(&present));
        assert!(!file_exists("/nowhere/missing.flac"));
        assert!(!file_exists("C:\\Windows"));
        assert!(!file_exists("netsearch://dz123"));
    }

    #[test]
    fn test_validate_report() {
        let (_dir, db, present) = setup();
        let report = validate(db.iter_songs().unwrap());

        assert_eq!(report.total, 8);
        assert_eq!(report.audio_valid, 1);
        assert_eq!(report.audio_missing, 1);
        assert_eq!(report.non_audio, 1);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.windows_paths, 3);
        assert_eq!(report.netsearch, 1);
        assert_eq!(report.missing_files, vec!["/nowhere/missing.flac".to_string()]);
        assert_eq!(report.non_audio_files, vec!["/nowhere/pack.zip".to_string()]);
        assert_eq!(report.windows_drives["D"], 2);
        assert_eq!(report.windows_drives["E"], 1);
        assert_eq!(report.extensions[0], ("mp3".to_string(), 4));
        assert!(report.extensions.contains(&("(none)".to_string(), 1)));
        assert!(!report.missing_files.contains(&present));
    }

    #[test]
    fn test_find_and_remove() {
        let (_dir, mut db, _present) = setup();

        let missing: Vec<String> = find_missing_files(db.iter_songs().unwrap())
            .into_iter()
            .map(|s| s.file_path.clone())
            .collect();
        assert_eq!(missing.len(), 3);
        assert!(missing.contains(&"/nowhere/pack.zip".to_string()));

        let non_audio: Vec<String> = find_non_audio_entries(db.iter_songs().unwrap())
            .into_iter()
            .map(|s| s.file_path.clone())
            .collect();
        assert_eq!(
            non_audio,
            vec!["/nowhere/pack.zip".to_string(), "/nowhere/notes.xyz".to_string()]
        );

        assert_eq!(remove_entries(&mut db, &non_audio).unwrap(), 2);
        assert_eq!(remove_entries(&mut db, &non_audio).unwrap(), 0);
        assert_eq!(db.len().unwrap(), 6);
    }
}
