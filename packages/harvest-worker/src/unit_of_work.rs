//! One sub-task's worth of extraction.
//!
//! A [`UnitOfWork`] turns a sub-task plus the live resource handle into a lazy
//! stream of records. [`collect_batch`] drains that stream into a
//! [`BatchResult`], stopping at the first error, on cancellation, or at the
//! deadline. Records gathered before a failure are kept so the caller can
//! persist them before it records the error.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::SubtaskError;

/// One structured row.
pub type Record = Map<String, Value>;

pub type RecordStream = BoxStream<'static, Result<Record, SubtaskError>>;

/// An element of the worker's ordered work list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subtask {
    pub key: String,
    pub position: usize,
}

impl Subtask {
    /// Number a list of keys in order.
    pub fn sequence<I, S>(keys: I) -> Vec<Subtask>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .map(|(position, key)| Subtask {
                key: key.into(),
                position,
            })
            .collect()
    }
}

/// Produces the records for one sub-task using the held resource.
///
/// Each call starts the sub-task from scratch; a stream is not resumable.
pub trait UnitOfWork<H>: Send + Sync {
    fn run(&self, subtask: &Subtask, handle: &H) -> RecordStream;
}

/// Records produced by one sub-task, plus the error that cut it short.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub records: Vec<Record>,
    pub error: Option<SubtaskError>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Drain a record stream for one sub-task.
pub async fn collect_batch(
    mut stream: RecordStream,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> BatchResult {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut batch = BatchResult::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                batch.error = Some(SubtaskError::Cancelled);
                break;
            }
            _ = sleep_until(deadline) => {
                batch.error = timeout.map(SubtaskError::Timeout);
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(record)) => batch.records.push(record),
            Some(Err(e)) => {
                batch.error = Some(e);
                break;
            }
            None => break,
        }
    }

    batch
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handles that expose environment variables to external extractors.
pub trait ExtractorEnv {
    fn extractor_env(&self) -> Vec<(String, String)>;
}

impl ExtractorEnv for crate::browser::BrowserProcess {
    fn extractor_env(&self) -> Vec<(String, String)> {
        self.env()
    }
}

/// Runs an external extraction command once per sub-task.
///
/// Every stdout line holding a JSON object is a record; any other line is
/// forwarded to the log. Stderr is inherited, so it lands in the job log
/// directly. A non-zero exit ends the stream with an error after the
/// records already emitted.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl<H: ExtractorEnv + Send + Sync> UnitOfWork<H> for CommandExtractor {
    fn run(&self, subtask: &Subtask, handle: &H) -> RecordStream {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().cloned())
            .envs(handle.extractor_env())
            .env("HARVEST_SUBTASK", &subtask.key)
            .env("HARVEST_SUBTASK_POSITION", subtask.position.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        Box::pin(extractor_stream(command, subtask.key.clone()))
    }
}

fn extractor_stream(
    mut command: Command,
    key: String,
) -> impl Stream<Item = Result<Record, SubtaskError>> + Send {
    try_stream! {
        let mut child = command.spawn().map_err(SubtaskError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SubtaskError::Other("extractor stdout unavailable".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.map_err(SubtaskError::Io)? {
            match parse_record(&line) {
                Some(record) => yield record,
                None if line.trim().is_empty() => {}
                None => info!(subtask = %key, "{}", line),
            }
        }

        let status = child.wait().await.map_err(SubtaskError::Io)?;
        if !status.success() {
            Err::<(), _>(SubtaskError::ExitStatus(status.to_string()))?;
        }
    }
}

fn parse_record(line: &str) -> Option<Record> {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(record)) => Some(record),
        _ => None,
    }
}
