//! Timestamped copies of database files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use vdjm_core::atomic::write_atomic;

use crate::error::{DatabaseError, Result};

/// Label used for the safety copy taken before a restore.
pub const PRE_RESTORE_LABEL: &str = "pre_restore";

const BACKUP_EXTENSION: &str = "xml";

/// Manages backups of database files in a single directory.
///
/// Backups are named `<stem>[_<label>]_<YYYYmmdd_HHMMSS>.xml`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn backup_name(db_path: &Path, label: Option<&str>, suffix: usize) -> String {
        let stem = db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string());
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut name = stem;
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            name.push('_');
            name.push_str(label);
        }
        name.push_str(&format!("_{}", timestamp));
        if suffix > 0 {
            name.push_str(&format!("_{}", suffix));
        }
        format!("{}.{}", name, BACKUP_EXTENSION)
    }

    /// Copy `db_path` into the backup directory and return the new file.
    pub fn create_backup(&self, db_path: &Path, label: Option<&str>) -> Result<PathBuf> {
        if !db_path.is_file() {
            return Err(DatabaseError::NotFound(db_path.to_path_buf()));
        }
        fs::create_dir_all(&self.backup_dir)?;

        // Several backups within one second get a numeric suffix.
        let mut suffix = 0;
        let backup_path = loop {
            let candidate = self
                .backup_dir
                .join(Self::backup_name(db_path, label, suffix));
            if !candidate.exists() {
                break candidate;
            }
            suffix += 1;
        };

        fs::copy(db_path, &backup_path)?;
        log::info!(
            "Backed up {} to {}",
            db_path.display(),
            backup_path.display()
        );
        Ok(backup_path)
    }

    /// All backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_backup = path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(BACKUP_EXTENSION));
            if !is_backup {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            backups.push((modified, path));
        }

        backups.sort_by(|a, b| b.cmp(a));
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }

    pub fn latest_backup(&self) -> Result<Option<PathBuf>> {
        Ok(self.list_backups()?.into_iter().next())
    }

    /// Replace `target` with the contents of `backup`.
    ///
    /// An existing target is backed up first under the `pre_restore` label;
    /// the path of that safety copy is returned.
    pub fn restore_backup(&self, backup: &Path, target: &Path) -> Result<Option<PathBuf>> {
        if !backup.is_file() {
            return Err(DatabaseError::NotFound(backup.to_path_buf()));
        }

        let safety = if target.exists() {
            Some(self.create_backup(target, Some(PRE_RESTORE_LABEL))?)
        } else {
            None
        };

        let bytes = fs::read(backup)?;
        write_atomic(target, &bytes)?;
        log::info!("Restored {} from {}", target.display(), backup.display());
        Ok(safety)
    }

    /// Delete all but the `keep` newest backups. Returns how many were removed.
    pub fn cleanup_old_backups(&self, keep: usize) -> Result<usize> {
        let backups = self.list_backups()?;
        let mut removed = 0;
        for path in backups.into_iter().skip(keep) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("Removed old backup {}", path.display());
                    removed += 1;
                }
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            log::info!("Removed {} old backup(s)", removed);
        }
        Ok(removed)
    }

    /// Combined size of all backups in bytes.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self
            .list_backups()?
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum())
    }
}
