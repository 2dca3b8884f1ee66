//! Artifact upload hook.
//!
//! The worker ships its output file after each sub-task and once at the end.
//! Uploads are best-effort: a failed upload is logged and the run continues,
//! because the local file is already complete and the next upload retries it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::UploadError;

#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<(), UploadError>;
}

/// Runs `program args... <path>`, e.g. `aws s3 cp <path> s3://bucket/prefix/`
/// through a wrapper script.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandUploader {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ArtifactUploader for CommandUploader {
    async fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(UploadError::Spawn)?;

        if status.success() {
            Ok(())
        } else {
            Err(UploadError::ExitStatus(status.to_string()))
        }
    }
}

/// Upload `path` if it exists and is non-empty; never fails the caller.
pub async fn upload_best_effort(uploader: &dyn ArtifactUploader, path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => {
            warn!(path = %path.display(), "artifact is empty, skipping upload");
            return;
        }
        Err(_) => {
            warn!(path = %path.display(), "artifact not found, skipping upload");
            return;
        }
    }

    match uploader.upload(path).await {
        Ok(()) => info!(path = %path.display(), "artifact uploaded"),
        Err(e) => warn!(path = %path.display(), error = %e, "artifact upload failed"),
    }
}
