//! Finding songs that are probably the same track.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::Song;

/// Bytes hashed for the first, cheap comparison.
const PARTIAL_HASH_BYTES: u64 = 1024 * 1024;

/// Songs sharing a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    pub file_paths: Vec<String>,
}

/// Result of [`find_all_duplicates`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Same artist and title, ignoring case.
    pub by_metadata: Vec<DuplicateGroup>,
    /// Same file name in different folders.
    pub by_filename: Vec<DuplicateGroup>,
    /// Identical content. Only filled when hashing was requested.
    pub by_hash: Vec<Vec<String>>,
}

impl DuplicateReport {
    /// Files that could be removed while keeping one copy of each.
    pub fn exact_duplicates(&self) -> usize {
        self.by_hash.iter().map(|group| group.len() - 1).sum()
    }
}

fn groups_of<'a, I, F>(songs: I, key_of: F) -> Vec<DuplicateGroup>
where
    I: IntoIterator<Item = &'a Song>,
    F: Fn(&Song) -> Option<String>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for song in songs {
        if let Some(key) = key_of(song) {
            groups.entry(key).or_default().push(song.file_path.clone());
        }
    }
    groups
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(key, file_paths)| DuplicateGroup { key, file_paths })
        .collect()
}

/// Group by lowercase `artist|title`. Songs missing either are ignored.
pub fn find_by_metadata<'a, I>(songs: I) -> Vec<DuplicateGroup>
where
    I: IntoIterator<Item = &'a Song>,
{
    groups_of(songs, |song| {
        let tags = song.tags.as_ref()?;
        let author = tags.author.as_deref()?.trim().to_lowercase();
        let title = tags.title.as_deref()?.trim().to_lowercase();
        Some(format!("{}|{}", author, title))
    })
}

/// Group by lowercase file name, whatever the folder or path style.
pub fn find_by_filename<'a, I>(songs: I) -> Vec<DuplicateGroup>
where
    I: IntoIterator<Item = &'a Song>,
{
    groups_of(songs, |song| {
        song.file_path
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
    })
}

fn hash_file(path: &Path, limit: Option<u64>) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> = match limit {
        Some(limit) => Box::new(file.take(limit)),
        None => Box::new(file),
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a whole file, hex encoded.
pub fn file_hash(path: &Path) -> io::Result<String> {
    hash_file(path, None)
}

/// SHA-256 of the first megabyte of a file, hex encoded.
pub fn partial_hash(path: &Path) -> io::Result<String> {
    hash_file(path, Some(PARTIAL_HASH_BYTES))
}

fn hash_groups<'a>(
    songs: &[&'a Song],
    hash: fn(&Path) -> io::Result<String>,
) -> BTreeMap<String, Vec<&'a Song>> {
    let mut groups: BTreeMap<String, Vec<&Song>> = BTreeMap::new();
    for song in songs {
        match hash(Path::new(&song.file_path)) {
            Ok(digest) => groups.entry(digest).or_default().push(*song),
            Err(e) => log::debug!("Cannot hash {}: {}", song.file_path, e),
        }
    }
    groups
}

/// Local files with identical content.
///
/// Candidates must share a recorded `FileSize`. Groups matching on size and
/// the first megabyte are accepted as they are when there are two files;
/// bigger groups are confirmed with a full hash.
pub fn find_by_hash<'a, I>(songs: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = &'a Song>,
{
    let mut by_size: BTreeMap<u64, Vec<&Song>> = BTreeMap::new();
    for song in songs.into_iter().filter(|s| s.is_local()) {
        if let Some(size) = song.file_size.filter(|size| *size > 0) {
            by_size.entry(size).or_default().push(song);
        }
    }

    let mut duplicates = Vec::new();
    for candidates in by_size.into_values().filter(|group| group.len() > 1) {
        for group in hash_groups(&candidates, partial_hash).into_values() {
            if group.len() == 2 {
                duplicates.push(group.iter().map(|s| s.file_path.clone()).collect());
            } else if group.len() > 2 {
                for confirmed in hash_groups(&group, file_hash).into_values() {
                    if confirmed.len() > 1 {
                        duplicates.push(confirmed.iter().map(|s| s.file_path.clone()).collect());
                    }
                }
            }
        }
    }
    duplicates
}

/// Run every check. Hashing reads files and is skipped unless asked for.
pub fn find_all_duplicates(songs: &[&Song], include_hash: bool) -> DuplicateReport {
    let report = DuplicateReport {
        by_metadata: find_by_metadata(songs.iter().copied()),
        by_filename: find_by_filename(songs.iter().copied()),
        by_hash: if include_hash {
            find_by_hash(songs.iter().copied())
        } else {
            Vec::new()
        },
    };
    log::info!(
        "Found {} metadata and {} file name duplicate groups",
        report.by_metadata.len(),
        report.by_filename.len()
    );
    report
}
