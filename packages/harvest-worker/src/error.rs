//! Error types for the worker.
//!
//! Propagation follows the blast radius of each failure:
//! - [`SubtaskError`] stays local to one sub-task; the loop moves on.
//! - [`ResourceError::Creation`] ends the worker (no resource, no progress).
//! - [`ResourceError::Destruction`] is logged and swallowed by the manager.
//! - [`WorkerError`] is what the binary turns into a non-zero exit code.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to create resource: {0}")]
    Creation(String),

    #[error("failed to destroy resource: {0}")]
    Destruction(String),
}

/// Failure while producing records for one sub-task.
#[derive(Debug, Error)]
pub enum SubtaskError {
    #[error("failed to start extractor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("extractor i/o failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("extractor exited with {0}")]
    ExitStatus(String),

    #[error("sub-task timed out after {0:?}")]
    Timeout(Duration),

    #[error("sub-task cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record sink i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload command could not start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("upload command exited with {0}")]
    ExitStatus(String),
}

/// Errors that end the worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    ResourceCreation(ResourceError),

    #[error("failed to persist records for {key}: {source}")]
    Persistence {
        key: String,
        #[source]
        source: SinkError,
    },

    #[error("aborting after {0} consecutive sub-task failures")]
    TooManyFailures(usize),
}
