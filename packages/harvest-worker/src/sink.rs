//! Persistence of record batches.
//!
//! Batches are written as soon as a sub-task ends, so nothing is held across
//! sub-tasks and a crash loses at most the sub-task in flight.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::unit_of_work::{Record, Subtask};

#[async_trait]
pub trait RecordSink: Send {
    /// Persist one sub-task's records and return how many rows were written.
    async fn persist(&mut self, subtask: &Subtask, records: Vec<Record>) -> Result<usize, SinkError>;

    /// File an uploader should ship, if the sink writes to one.
    fn artifact(&self) -> Option<&Path> {
        None
    }
}

type RowKey = [u8; 32];

/// Appends records to a JSON-lines file, skipping rows already written.
///
/// Rows are keyed by a SHA-256 over `key_fields` (trimmed, lower-cased) or
/// over the whole row when none of those fields is present. Keys of rows
/// already in the file are loaded on open, so reruns append without
/// duplicating.
pub struct JsonLinesSink {
    path: PathBuf,
    file: File,
    key_fields: Vec<String>,
    seen: HashSet<RowKey>,
}

impl JsonLinesSink {
    pub async fn open(path: impl Into<PathBuf>, key_fields: Vec<String>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut seen = HashSet::new();
        match fs::read_to_string(&path).await {
            Ok(existing) => {
                for line in existing.lines() {
                    match serde_json::from_str::<Value>(line) {
                        Ok(Value::Object(row)) => {
                            seen.insert(row_key(&row, &key_fields));
                        }
                        _ if line.trim().is_empty() => {}
                        // A malformed line must not block the run.
                        _ => warn!(path = %path.display(), "skipping malformed line in existing output"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), existing = seen.len(), "record sink opened");

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        Ok(Self {
            path,
            file,
            key_fields,
            seen,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_seen(&self) -> usize {
        self.seen.len()
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn persist(&mut self, subtask: &Subtask, records: Vec<Record>) -> Result<usize, SinkError> {
        let offered = records.len();
        let mut buffer = Vec::new();
        let mut written = 0;

        for record in records {
            if !self.seen.insert(row_key(&record, &self.key_fields)) {
                continue;
            }
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
            written += 1;
        }

        if written > 0 {
            self.file.write_all(&buffer).await?;
            self.file.flush().await?;
            self.file.sync_data().await?;
        }

        debug!(
            subtask = %subtask.key,
            offered,
            written,
            duplicates = offered - written,
            "batch persisted"
        );
        Ok(written)
    }

    fn artifact(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn row_key(row: &Record, key_fields: &[String]) -> RowKey {
    let mut hasher = Sha256::new();
    let mut keyed = false;

    for field in key_fields {
        let Some(value) = row.get(field) else {
            continue;
        };
        let normalized = match value {
            Value::String(s) => s.trim().to_lowercase(),
            Value::Null => continue,
            other => other.to_string(),
        };
        if normalized.is_empty() {
            continue;
        }
        hasher.update(field.as_bytes());
        hasher.update(b"=");
        hasher.update(normalized.as_bytes());
        hasher.update(b"\x1f");
        keyed = true;
    }

    if !keyed {
        hasher.update(Value::Object(row.clone()).to_string().as_bytes());
    }

    hasher.finalize().into()
}
