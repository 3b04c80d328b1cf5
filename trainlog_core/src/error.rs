//! Error types for the trainlog_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for trainlog_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persistence service rejected or failed a call
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// The action would break a record invariant and was not applied
    #[error("Invalid action: {0}")]
    Invariant(String),

    /// No record with this id is loaded
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Failure reported by a [`WorkoutService`](crate::service::WorkoutService).
///
/// Kept separate from [`Error`] so the sync engine can tell a conflict from
/// a transport failure without string matching.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The record was modified by someone else
    #[error("conflict: {0}")]
    Conflict(String),

    /// The payload was rejected
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record does not exist in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// The store could not be reached
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The backing storage failed
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Service(inner) => inner,
            Error::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Storage(other.to_string()),
        }
    }
}

impl From<io::Error> for ServiceError {
    fn from(err: io::Error) -> Self {
        ServiceError::Storage(err.to_string())
    }
}
