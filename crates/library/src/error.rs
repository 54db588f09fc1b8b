//! Errors raised by the database engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, mutating or saving a database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database not loaded")]
    NotLoaded,

    #[error("Database not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Song already exists: {0}")]
    DuplicatePath(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
