//! Rewriting Windows file paths to local ones by prefix.

use std::collections::BTreeMap;
use std::path::Path;

use crate::database::VdjDatabase;
use crate::error::{DatabaseError, Result};
use crate::types::Song;

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// One proposed path change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapEntry {
    pub old_path: String,
    pub new_path: String,
    /// Whether `new_path` exists on disk (always `true` when not verified).
    pub exists: bool,
}

/// Outcome of [`PathRemapper::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapSummary {
    pub remapped: usize,
    /// Entries left alone because their target is missing.
    pub skipped: usize,
    /// Entries whose source vanished or whose target was already taken.
    pub failed: usize,
}

/// Prefix-based path mapper, e.g. `D:/Music/` to `/Volumes/Music/`.
#[derive(Debug, Clone, Default)]
pub struct PathRemapper {
    mappings: BTreeMap<String, String>,
}

impl PathRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings<I, K, V>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut remapper = Self::new();
        for (from, to) in mappings {
            remapper.add_mapping(from.as_ref(), to);
        }
        remapper
    }

    pub fn mappings(&self) -> &BTreeMap<String, String> {
        &self.mappings
    }

    pub fn add_mapping(&mut self, from_prefix: &str, to_prefix: impl Into<String>) {
        self.mappings.insert(normalize(from_prefix), to_prefix.into());
    }

    pub fn remove_mapping(&mut self, from_prefix: &str) -> bool {
        self.mappings.remove(&normalize(from_prefix)).is_some()
    }

    /// Rewrite `path` with the longest matching prefix, if any.
    pub fn remap(&self, path: &str) -> Option<String> {
        let normalized = normalize(path);
        self.mappings
            .iter()
            .filter(|(from, _)| normalized.starts_with(from.as_str()))
            .max_by_key(|(from, _)| from.len())
            .map(|(from, to)| format!("{}{}", to, &normalized[from.len()..]))
    }

    /// Windows prefixes (`D:/` or `D:/Folder/`) with the songs under each.
    pub fn detect_windows_prefixes<'a, I>(songs: I) -> BTreeMap<String, Vec<String>>
    where
        I: IntoIterator<Item = &'a Song>,
    {
        let mut prefixes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for song in songs.into_iter().filter(|s| s.is_windows_path()) {
            let normalized = normalize(&song.file_path);
            let mut parts = normalized.split('/');
            let drive = parts.next().unwrap_or_default();
            // Only a directory counts as the second component.
            let prefix = match (parts.next(), parts.next()) {
                (Some(folder), Some(_)) if !folder.is_empty() => format!("{}/{}/", drive, folder),
                _ => format!("{}/", drive),
            };
            prefixes
                .entry(prefix)
                .or_default()
                .push(song.file_path.clone());
        }
        prefixes
    }

    /// Detected prefixes no mapping covers.
    pub fn unmapped_prefixes<'a, I>(&self, songs: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a Song>,
    {
        Self::detect_windows_prefixes(songs)
            .into_keys()
            .filter(|prefix| {
                !self.mappings.keys().any(|from| {
                    prefix.starts_with(from.as_str()) || from.starts_with(prefix.as_str())
                })
            })
            .collect()
    }

    /// Proposed changes for every Windows path a mapping covers.
    pub fn plan<'a, I>(&self, songs: I, verify_exists: bool) -> Vec<RemapEntry>
    where
        I: IntoIterator<Item = &'a Song>,
    {
        songs
            .into_iter()
            .filter(|song| song.is_windows_path())
            .filter_map(|song| {
                let new_path = self.remap(&song.file_path)?;
                let exists = !verify_exists || Path::new(&new_path).exists();
                Some(RemapEntry {
                    old_path: song.file_path.clone(),
                    new_path,
                    exists,
                })
            })
            .collect()
    }

    /// Apply a plan to the database. Entries whose target is missing are
    /// skipped when `skip_missing` is set.
    pub fn apply(
        &self,
        db: &mut VdjDatabase,
        plan: &[RemapEntry],
        skip_missing: bool,
    ) -> Result<RemapSummary> {
        let mut summary = RemapSummary::default();
        for entry in plan {
            if skip_missing && !entry.exists {
                summary.skipped += 1;
                continue;
            }
            match db.remap_path(&entry.old_path, &entry.new_path) {
                Ok(true) => summary.remapped += 1,
                Ok(false) => {
                    log::warn!("Song no longer in database: {}", entry.old_path);
                    summary.failed += 1;
                }
                Err(DatabaseError::DuplicatePath(path)) => {
                    log::warn!("Cannot remap {}: {} already exists", entry.old_path, path);
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        log::info!(
            "Remapped {} path(s), skipped {}, failed {}",
            summary.remapped,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}
