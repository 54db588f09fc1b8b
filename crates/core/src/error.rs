use thiserror::Error;

use crate::checkpoint::TaskStatus;

/// Errors raised by the checkpoint store and batch runner.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
