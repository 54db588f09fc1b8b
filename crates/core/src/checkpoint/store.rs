//! Directory of JSON checkpoint files, one per task.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde_json::{Map, Value};

use super::task::{TaskState, TaskStatus, TaskType};
use crate::atomic::write_atomic_with;
use crate::error::CheckpointError;

const CHECKPOINT_EXTENSION: &str = "json";

/// Saves and loads [`TaskState`] checkpoints as `<task_id>.json`.
pub struct CheckpointStore {
    checkpoint_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Check that a task id names a file inside the checkpoint directory.
    pub fn is_valid_task_id(task_id: &str) -> bool {
        !task_id.is_empty()
            && !task_id.contains(['/', '\\', '\0'])
            && !task_id.contains("..")
    }

    /// Path of a task's checkpoint, or `None` for an unusable id.
    fn checkpoint_path(&self, task_id: &str) -> Option<PathBuf> {
        if !Self::is_valid_task_id(task_id) {
            log::warn!("Rejecting checkpoint task id {:?}", task_id);
            return None;
        }
        Some(
            self.checkpoint_dir
                .join(format!("{}.{}", task_id, CHECKPOINT_EXTENSION)),
        )
    }

    /// Generate an id of the form `{type}_{YYYYmmdd_HHMMSS}_{8 hex}`.
    pub fn generate_task_id(task_type: TaskType) -> String {
        format!(
            "{}_{}_{:08x}",
            task_type.as_str(),
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            rand::random::<u32>()
        )
    }

    /// Create a new pending task. Nothing is written until [`save`](Self::save).
    pub fn create_task(
        &self,
        task_type: TaskType,
        paths: Vec<String>,
        config: Map<String, Value>,
    ) -> TaskState {
        TaskState::new(Self::generate_task_id(task_type), task_type, paths, config)
    }

    /// Refresh `updated_at` and write the checkpoint.
    pub fn save(&self, state: &mut TaskState) -> Result<PathBuf, CheckpointError> {
        state.updated_at = Utc::now();
        self.save_preserving_timestamp(state)
    }

    /// Write the checkpoint exactly as given.
    pub fn save_preserving_timestamp(
        &self,
        state: &TaskState,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self
            .checkpoint_path(&state.task_id)
            .ok_or_else(|| CheckpointError::InvalidTaskId(state.task_id.clone()))?;
        fs::create_dir_all(&self.checkpoint_dir)?;
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic_with(&path, |writer| writer.write_all(&json))?;
        log::debug!(
            "Saved checkpoint {} ({}/{} processed)",
            state.task_id,
            state.processed_count(),
            state.total_items
        );
        Ok(path)
    }

    fn read_checkpoint(path: &Path) -> Option<TaskState> {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Failed to read checkpoint {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("Ignoring corrupt checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load a checkpoint. Missing or corrupt files yield `None`.
    pub fn load(&self, task_id: &str) -> Option<TaskState> {
        Self::read_checkpoint(&self.checkpoint_path(task_id)?)
    }

    /// Delete a checkpoint. Returns `false` if there was nothing to delete.
    pub fn delete(&self, task_id: &str) -> bool {
        let Some(path) = self.checkpoint_path(task_id) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                log::warn!("Failed to delete checkpoint {}: {}", path.display(), e);
                false
            }
        }
    }

    /// All readable checkpoints, most recently updated first.
    pub fn list_checkpoints(&self) -> Vec<TaskState> {
        let entries = match fs::read_dir(&self.checkpoint_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!(
                    "Failed to list checkpoints in {}: {}",
                    self.checkpoint_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut checkpoints: Vec<TaskState> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == CHECKPOINT_EXTENSION)
            })
            .filter_map(|path| Self::read_checkpoint(&path))
            .collect();

        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        checkpoints
    }

    /// Paused or crashed tasks with work remaining.
    pub fn list_resumable(&self) -> Vec<TaskState> {
        self.list_checkpoints()
            .into_iter()
            .filter(TaskState::is_resumable)
            .collect()
    }

    /// Everything not in a terminal state.
    pub fn list_incomplete(&self) -> Vec<TaskState> {
        self.list_checkpoints()
            .into_iter()
            .filter(|state| !state.is_complete())
            .collect()
    }

    /// Delete finished checkpoints last updated more than `max_age_days` ago.
    pub fn cleanup_completed(&self, max_age_days: u32) -> usize {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let deleted = self
            .list_checkpoints()
            .into_iter()
            .filter(|state| state.is_complete() && state.updated_at < cutoff)
            .filter(|state| self.delete(&state.task_id))
            .count();
        if deleted > 0 {
            log::info!("Removed {} finished checkpoint(s)", deleted);
        }
        deleted
    }

    /// Resume a task: load it and mark it running again.
    ///
    /// Crashed tasks are already `running` and are returned as they are.
    pub fn resume(&self, task_id: &str) -> Result<Option<TaskState>, CheckpointError> {
        let Some(mut state) = self.load(task_id) else {
            return Ok(None);
        };
        if state.status != TaskStatus::Running {
            state.transition(TaskStatus::Running)?;
        }
        Ok(Some(state))
    }
}
