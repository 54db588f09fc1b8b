//! Persistent state of a long-running batch task.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CheckpointError;

/// Kind of batch operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Normalize,
    Measure,
    AnalyzeEnergy,
    AnalyzeMood,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Measure => "measure",
            Self::AnalyzeEnergy => "analyze_energy",
            Self::AnalyzeMood => "analyze_mood",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normalize" => Some(Self::Normalize),
            "measure" => Some(Self::Measure),
            "analyze_energy" => Some(Self::AnalyzeEnergy),
            "analyze_mood" => Some(Self::AnalyzeMood),
            _ => None,
        }
    }
}

/// Lifecycle status of a task.
///
/// ```text
/// pending -> running -> paused | completed | cancelled | failed
/// paused  -> running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
                | (Paused, Running)
        )
    }

    /// Terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Checkpointed state of one batch task.
///
/// Every path given at creation lives in exactly one of `pending_paths`,
/// `completed_paths` or `failed_paths`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub total_items: usize,
    #[serde(default)]
    pub completed_paths: Vec<String>,
    #[serde(default)]
    pub pending_paths: Vec<String>,
    /// Path to error message.
    #[serde(default)]
    pub failed_paths: BTreeMap<String, String>,
    /// Task-specific settings (target LUFS, worker count, ...).
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Per-item results in completion order.
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// Create a pending task over `paths`.
    pub fn new(
        task_id: impl Into<String>,
        task_type: TaskType,
        paths: Vec<String>,
        config: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            task_type,
            status: TaskStatus::Pending,
            total_items: paths.len(),
            completed_paths: Vec::new(),
            pending_paths: paths,
            failed_paths: BTreeMap::new(),
            config,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Completed plus failed.
    pub fn processed_count(&self) -> usize {
        self.completed_paths.len() + self.failed_paths.len()
    }

    /// Progress as a percentage (0-100).
    pub fn progress_percent(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.processed_count() as f64 / self.total_items as f64 * 100.0
    }

    /// Paused, or left running by a crash, with work remaining.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, TaskStatus::Paused | TaskStatus::Running)
            && !self.pending_paths.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), CheckpointError> {
        if !self.status.can_transition_to(next) {
            return Err(CheckpointError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        log::debug!(
            "Task {}: {} -> {}",
            self.task_id,
            self.status.as_str(),
            next.as_str()
        );
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a successful item. Safe to call more than once for a path.
    pub fn mark_completed(&mut self, path: &str, result: Option<Value>) {
        self.pending_paths.retain(|p| p != path);
        self.failed_paths.remove(path);
        if !self.completed_paths.iter().any(|p| p == path) {
            self.completed_paths.push(path.to_string());
        }
        if let Some(result) = result {
            self.results.push(result);
        }
        self.updated_at = Utc::now();
    }

    /// Record a failed item with its error message.
    pub fn mark_failed(&mut self, path: &str, error: impl Into<String>) {
        self.pending_paths.retain(|p| p != path);
        self.completed_paths.retain(|p| p != path);
        self.failed_paths.insert(path.to_string(), error.into());
        self.updated_at = Utc::now();
    }
}

/// RFC 3339 timestamps, also accepting naive local ISO-8601 values.
pub(crate) mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Some(match naive.and_local_timezone(Local).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => naive.and_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskState {
        TaskState::new(
            "normalize_test",
            TaskType::Normalize,
            vec!["/a.mp3".into(), "/b.mp3".into(), "/c.mp3".into()],
            Map::new(),
        )
    }

    fn assert_partitioned(state: &TaskState) {
        let total = state.pending_paths.len()
            + state.completed_paths.len()
            + state.failed_paths.len();
        assert_eq!(total, state.total_items);
        for path in &state.pending_paths {
            assert!(!state.completed_paths.contains(path));
            assert!(!state.failed_paths.contains_key(path));
        }
        for path in &state.completed_paths {
            assert!(!state.failed_paths.contains_key(path));
        }
    }

    #[test]
    fn test_mark_completed_and_failed() {
        let mut state = sample();
        state.mark_completed("/a.mp3", Some(serde_json::json!({"lufs": -14.2})));
        state.mark_failed("/b.mp3", "decode error");

        assert_eq!(state.pending_paths, vec!["/c.mp3".to_string()]);
        assert_eq!(state.processed_count(), 2);
        assert_eq!(state.results.len(), 1);
        assert!((state.progress_percent() - 66.666).abs() < 0.01);
        assert_partitioned(&state);
    }

    #[test]
    fn test_marking_is_idempotent_and_exclusive() {
        let mut state = sample();
        state.mark_completed("/a.mp3", None);
        state.mark_completed("/a.mp3", None);
        assert_eq!(state.completed_paths.len(), 1);

        state.mark_failed("/a.mp3", "retry failed");
        assert!(state.completed_paths.is_empty());
        assert_eq!(state.failed_paths.len(), 1);

        state.mark_completed("/a.mp3", None);
        assert!(state.failed_paths.is_empty());
        assert_partitioned(&state);
    }

    #[test]
    fn test_transitions() {
        let mut state = sample();
        assert!(state.transition(TaskStatus::Paused).is_err());
        state.transition(TaskStatus::Running).unwrap();
        state.transition(TaskStatus::Paused).unwrap();
        assert!(state.is_resumable());
        assert!(matches!(
            state.transition(TaskStatus::Completed),
            Err(CheckpointError::InvalidTransition { .. })
        ));
        state.transition(TaskStatus::Running).unwrap();
        state.transition(TaskStatus::Cancelled).unwrap();
        assert!(state.is_complete());
        assert!(!state.is_resumable());
        assert!(state.transition(TaskStatus::Running).is_err());
    }

    #[test]
    fn test_crashed_running_task_is_resumable() {
        let mut state = sample();
        state.status = TaskStatus::Running;
        assert!(state.is_resumable());
        state.pending_paths.clear();
        assert!(!state.is_resumable());
    }

    #[test]
    fn test_json_layout() {
        let state = sample();
        let json: Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["task_type"], "normalize");
        assert_eq!(json["status"], "pending");
        assert!(json["failed_paths"].is_object());
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn test_reads_naive_timestamps() {
        let json = r#"{
            "task_id": "measure_20240101_120000_abcdef12",
            "task_type": "measure",
            "status": "paused",
            "total_items": 1,
            "completed_paths": [],
            "pending_paths": ["/x.mp3"],
            "failed_paths": {},
            "config": {"target_lufs": -14.0},
            "results": [],
            "created_at": "2024-01-01T12:00:00.123456",
            "updated_at": "2024-01-01T12:05:00"
        }"#;
        let state: TaskState = serde_json::from_str(json).unwrap();
        assert_eq!(state.task_type, TaskType::Measure);
        assert!(state.is_resumable());
        assert!(state.updated_at > state.created_at);
    }
}
