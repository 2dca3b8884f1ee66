use std::path::PathBuf;

use thiserror::Error;

/// Contract violations on the job table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} already exists")]
    DuplicateIdentifier(String),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} is still running")]
    StillRunning(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read unit catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid unit catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no unit named {0}")]
    UnknownUnit(String),

    #[error("working directory {path} for unit {unit} does not exist")]
    MissingWorkingDir { unit: String, path: PathBuf },

    #[error("program {path} for unit {unit} does not exist")]
    MissingProgram { unit: String, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown unit {unit}: {reason}")]
    UnknownUnit { unit: String, reason: String },

    #[error("failed to open log sink {path}: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn worker for job {job_id}: {source}")]
    ProcessSpawn {
        job_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
