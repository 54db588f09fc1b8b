pub use batch::{
    run_batch, spawn_batch, BatchHandle, BatchOptions, BatchOutcome, BatchSummary, ItemOutcome,
    TaskControl,
};
pub use cache::{param_key, AnalysisCache, CacheStats, FileIdentity, Measurement, MeasurementCache};
pub use checkpoint::{CheckpointStore, TaskState, TaskStatus, TaskType};
pub use config::{ConfigError, ConfigManager, ConfigSchema, Settings};
pub use error::CheckpointError;

pub mod atomic;
pub mod batch;
pub mod cache;
pub mod checkpoint;
pub mod config;
mod error;
