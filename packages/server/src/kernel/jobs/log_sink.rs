//! Per-job log files.
//!
//! The worker's stdout and stderr are both pointed at one append-mode file,
//! so the log interleaves them the way a terminal would.

use std::fs::{self, File, OpenOptions};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_READ_LIMIT: usize = 64 * 1024;
pub const MAX_READ_LIMIT: usize = 1024 * 1024;

pub fn log_path(output_dir: &Path, job_id: &str) -> PathBuf {
    output_dir.join(format!("run_{job_id}.log"))
}

/// An opened sink, ready to hand to a child process.
pub struct LogSink {
    file: File,
}

impl LogSink {
    /// Create the log file fresh, creating parent directories as needed.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        // `truncate` and `append` cannot be combined in one open.
        drop(file);
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self { file })
    }

    /// `(stdout, stderr)` handles sharing the same file.
    pub fn into_stdio(self) -> io::Result<(Stdio, Stdio)> {
        let stderr = self.file.try_clone()?;
        Ok((Stdio::from(self.file), Stdio::from(stderr)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogChunk {
    pub data: String,
    pub next_offset: u64,
    /// No more bytes past `next_offset` at the time of reading.
    pub eof: bool,
}

/// Read up to `limit` bytes starting at `offset`.
pub async fn read_chunk(path: &Path, offset: u64, limit: usize) -> io::Result<LogChunk> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = offset.min(len);
    let limit = limit.clamp(1, MAX_READ_LIMIT);

    file.seek(SeekFrom::Start(start)).await?;
    let mut buffer = Vec::with_capacity(limit.min((len - start) as usize));
    file.take(limit as u64).read_to_end(&mut buffer).await?;

    let next_offset = start + buffer.len() as u64;
    Ok(LogChunk {
        data: String::from_utf8_lossy(&buffer).into_owned(),
        next_offset,
        eof: next_offset >= len,
    })
}
