//! Job model for supervised worker processes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use typed_builder::TypedBuilder;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Identifier allocated, process not started yet.
    #[default]
    Spawning,
    Running,
    /// Exited with status zero.
    Completed,
    /// Non-zero exit, death by an unrequested signal, or spawn failure.
    Failed,
    /// Stopped by `cancel`.
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Killed)
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(Debug, Clone, Serialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    pub id: String,
    pub unit: String,
    pub log_path: PathBuf,

    #[builder(default = Utc::now())]
    pub started_at: DateTime<Utc>,

    #[builder(default)]
    pub state: JobState,

    #[builder(default, setter(strip_option))]
    pub pid: Option<u32>,

    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub exit_code: Option<i32>,

    /// Signal that ended the process, when it did not exit normally.
    #[builder(default, setter(strip_option))]
    pub signal: Option<i32>,

    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    #[builder(default)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn mark_running(&mut self, pid: Option<u32>) {
        self.state = JobState::Running;
        self.pid = pid;
    }

    /// Move to a terminal state. A job that is already terminal is left as is.
    pub fn finish(&mut self, state: JobState, exit_code: Option<i32>, signal: Option<i32>) -> bool {
        if self.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.exit_code = exit_code;
        self.signal = signal;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let finished = self.finish(JobState::Failed, None, None);
        if finished {
            self.error = Some(error.into());
        }
        finished
    }
}

/// Returned by `Supervisor::start`.
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub unit: String,
    pub log_path: PathBuf,
    pub pid: Option<u32>,
}
