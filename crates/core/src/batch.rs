//! Checkpointed batch processing with cooperative pause and cancel.
//!
//! The runner walks a task's pending paths in order, records each outcome
//! on the [`TaskState`] and writes a checkpoint every `checkpoint_every`
//! items and on exit. Pause and cancel requests are honoured between
//! items, never in the middle of one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use serde_json::Value;

use crate::checkpoint::{CheckpointStore, TaskState, TaskStatus};
use crate::error::CheckpointError;

/// Shared pause/cancel flags for a running batch.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the current item; the task ends `cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Stop after the current item; the task ends `paused` and can resume.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clear both flags before resuming.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// Tuning for [`run_batch`].
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Write a checkpoint after this many processed items.
    pub checkpoint_every: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 50,
        }
    }
}

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Finished,
    Paused,
    Cancelled,
}

/// Result of one item within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub path: String,
    pub error: Option<String>,
}

/// Totals for a single run (not the whole task history).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub outcome: BatchOutcome,
    pub items: Vec<ItemOutcome>,
}

/// Process the pending paths of `state`.
///
/// `process` returns a JSON result stored with the completed path, or an
/// error message recorded in `failed_paths`. Item failures never abort the
/// batch; only checkpoint I/O errors do.
pub fn run_batch<F>(
    state: &mut TaskState,
    store: &CheckpointStore,
    control: &TaskControl,
    options: BatchOptions,
    mut process: F,
) -> Result<BatchSummary, CheckpointError>
where
    F: FnMut(&str) -> Result<Value, String>,
{
    if state.status != TaskStatus::Running {
        state.transition(TaskStatus::Running)?;
    }
    store.save(state)?;
    log::info!(
        "Running task {} ({} pending of {})",
        state.task_id,
        state.pending_paths.len(),
        state.total_items
    );

    let checkpoint_every = options.checkpoint_every.max(1);
    let mut summary = BatchSummary {
        succeeded: 0,
        failed: 0,
        outcome: BatchOutcome::Finished,
        items: Vec::new(),
    };
    let mut since_checkpoint = 0;

    let queue = state.pending_paths.clone();
    for path in queue {
        if control.is_cancelled() {
            summary.outcome = BatchOutcome::Cancelled;
            break;
        }
        if control.is_paused() {
            summary.outcome = BatchOutcome::Paused;
            break;
        }

        match process(&path) {
            Ok(result) => {
                log::debug!("Processed {}", path);
                state.mark_completed(&path, Some(result));
                summary.succeeded += 1;
                summary.items.push(ItemOutcome { path, error: None });
            }
            Err(error) => {
                log::warn!("Failed to process {}: {}", path, error);
                state.mark_failed(&path, error.clone());
                summary.failed += 1;
                summary.items.push(ItemOutcome {
                    path,
                    error: Some(error),
                });
            }
        }

        since_checkpoint += 1;
        if since_checkpoint >= checkpoint_every {
            store.save(state)?;
            since_checkpoint = 0;
        }
    }

    let final_status = match summary.outcome {
        BatchOutcome::Finished => TaskStatus::Completed,
        BatchOutcome::Paused => TaskStatus::Paused,
        BatchOutcome::Cancelled => TaskStatus::Cancelled,
    };
    state.transition(final_status)?;
    store.save(state)?;

    log::info!(
        "Task {} {}: {} succeeded, {} failed, {} pending",
        state.task_id,
        final_status.as_str(),
        summary.succeeded,
        summary.failed,
        state.pending_paths.len()
    );
    Ok(summary)
}

/// A batch running on a background thread.
pub struct BatchHandle {
    control: TaskControl,
    handle: JoinHandle<Result<(TaskState, BatchSummary), CheckpointError>>,
}

impl BatchHandle {
    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and return the final state and summary.
    pub fn join(self) -> Result<(TaskState, BatchSummary), CheckpointError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Run [`run_batch`] on a worker thread.
pub fn spawn_batch<F>(
    mut state: TaskState,
    store: CheckpointStore,
    options: BatchOptions,
    process: F,
) -> BatchHandle
where
    F: FnMut(&str) -> Result<Value, String> + Send + 'static,
{
    let control = TaskControl::new();
    let worker_control = control.clone();
    let handle = thread::spawn(move || {
        let summary = run_batch(&mut state, &store, &worker_control, options, process)?;
        Ok((state, summary))
    });
    BatchHandle { control, handle }
}
