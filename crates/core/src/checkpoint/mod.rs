//! Resumable batch task checkpoints.

mod store;
mod task;

pub use store::CheckpointStore;
pub use task::{TaskState, TaskStatus, TaskType};
