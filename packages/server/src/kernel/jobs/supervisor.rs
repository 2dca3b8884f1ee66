//! Supervisor: spawns worker processes, tracks them, and cancels them.
//!
//! ```text
//! start(unit, env)
//!     ├─► sweep finished jobs past retention
//!     ├─► resolve unit                       UnknownUnit, nothing registered
//!     ├─► allocate id, open log sink
//!     ├─► register Job (SPAWNING)
//!     ├─► spawn process, stdout+stderr → sink  on error: FAILED + ProcessSpawn
//!     ├─► mark RUNNING
//!     └─► spawn watcher ──► child.wait() ──► COMPLETED | FAILED | KILLED
//!                  ▲
//! cancel(id) ──────┘ SIGTERM now, SIGKILL after kill_grace
//! ```
//!
//! The watcher task is the only owner of the `Child`. Cancellation reaches it
//! through a channel, so the signal is always sent by the task that will
//! observe the exit and record the terminal state.
//!
//! On unix each worker leads its own process group. SIGTERM goes to the worker
//! alone so it can release its browser itself; SIGKILL goes to the whole group,
//! since a killed worker cannot reap the browser and extractor it started.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::catalog::UnitCatalog;
use super::error::{RegistryError, SupervisorError};
use super::job::{Job, JobHandle, JobState};
use super::log_sink::{self, LogChunk, LogSink};
use super::registry::JobRegistry;

#[derive(Debug, Clone, TypedBuilder)]
pub struct SupervisorOptions {
    /// Directory holding `run_<id>.log` files.
    #[builder(default = PathBuf::from("output"), setter(into))]
    pub output_dir: PathBuf,

    /// How long finished jobs stay queryable.
    #[builder(default = Duration::from_secs(3600))]
    pub retention: Duration,

    /// Time between SIGTERM and SIGKILL on cancel.
    #[builder(default = Duration::from_secs(10))]
    pub kill_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct CancelRequest {
    delivered: oneshot::Sender<bool>,
}

type Controls = DashMap<String, mpsc::Sender<CancelRequest>>;

pub struct Supervisor {
    catalog: UnitCatalog,
    registry: Arc<JobRegistry>,
    controls: Arc<Controls>,
    options: SupervisorOptions,
    seq: AtomicU64,
}

impl Supervisor {
    pub fn new(catalog: UnitCatalog, options: SupervisorOptions) -> Self {
        Self {
            catalog,
            registry: Arc::new(JobRegistry::new()),
            controls: Arc::new(DashMap::new()),
            options,
            seq: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &UnitCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Spawn a worker for `unit_name` and return without waiting for it.
    ///
    /// Two jobs for the same unit may run at once; they share the unit's
    /// output artifacts, so callers should avoid overlapping runs of one unit.
    pub async fn start(
        &self,
        unit_name: &str,
        env: HashMap<String, String>,
    ) -> Result<JobHandle, SupervisorError> {
        self.sweep();

        let unit = self.catalog.resolve(unit_name).map_err(|e| {
            warn!(unit = %unit_name, error = %e, "unit not resolvable");
            SupervisorError::UnknownUnit {
                unit: unit_name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let id = self.next_id(&unit.name);
        let log_path = log_sink::log_path(&self.options.output_dir, &id);
        let (stdout, stderr) = LogSink::create(&log_path)
            .and_then(LogSink::into_stdio)
            .map_err(|source| SupervisorError::LogSink {
                path: log_path.clone(),
                source,
            })?;

        self.registry.register(
            Job::builder()
                .id(id.clone())
                .unit(unit.name.clone())
                .log_path(log_path.clone())
                .build(),
        )?;

        let mut command = Command::new(&unit.program);
        command
            .args(&unit.args)
            .current_dir(&unit.working_dir)
            .envs(&unit.env)
            .envs(&env)
            .env("HARVEST_JOB_ID", &id)
            .env("HARVEST_LOG_PATH", &log_path)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(job_id = %id, unit = %unit.name, error = %source, "worker spawn failed");
                self.registry
                    .update(&id, |job| job.fail(format!("spawn failed: {source}")))?;
                return Err(SupervisorError::ProcessSpawn { job_id: id, source });
            }
        };

        let pid = child.id();
        self.registry.update(&id, |job| job.mark_running(pid))?;

        let (requests_tx, requests) = mpsc::channel(4);
        self.controls.insert(id.clone(), requests_tx);
        tokio::spawn(
            Watcher {
                id: id.clone(),
                pid,
                requests,
                registry: self.registry.clone(),
                controls: self.controls.clone(),
                kill_grace: self.options.kill_grace,
            }
            .run(child),
        );

        info!(job_id = %id, unit = %unit.name, ?pid, log_path = %log_path.display(), "worker started");

        Ok(JobHandle {
            id,
            unit: unit.name,
            log_path,
            pid,
        })
    }

    pub fn status(&self, id: &str) -> Option<Job> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.registry.list()
    }

    pub fn active_runs(&self) -> usize {
        self.registry.active_count()
    }

    /// Ask a running job to stop.
    ///
    /// Returns `true` once SIGTERM was delivered; the job turns KILLED when
    /// its watcher sees the process exit. A job that already finished returns
    /// `false` and is left untouched.
    pub async fn cancel(&self, id: &str) -> Result<bool, SupervisorError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if job.is_terminal() {
            return Ok(false);
        }

        let Some(control) = self.controls.get(id).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };
        let (delivered_tx, delivered_rx) = oneshot::channel();
        if control
            .send(CancelRequest {
                delivered: delivered_tx,
            })
            .await
            .is_err()
        {
            return Ok(false);
        }

        let delivered = delivered_rx.await.unwrap_or(false);
        info!(job_id = %id, delivered, "cancel requested");
        Ok(delivered)
    }

    /// Evict a finished job.
    pub fn remove(&self, id: &str) -> Result<Job, SupervisorError> {
        Ok(self.registry.remove(id)?)
    }

    /// Evict finished jobs older than the retention window.
    pub fn sweep(&self) -> usize {
        self.registry.sweep(self.options.retention)
    }

    pub async fn read_log(&self, id: &str, offset: u64, limit: usize) -> Result<LogChunk, SupervisorError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        log_sink::read_chunk(&job.log_path, offset, limit)
            .await
            .map_err(|source| SupervisorError::LogSink {
                path: job.log_path.clone(),
                source,
            })
    }

    fn next_id(&self, unit: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{}_{:04}", unit, Utc::now().format("%Y%m%d_%H%M%S"), seq)
    }
}

/// Owns one child process until it exits.
struct Watcher {
    id: String,
    pid: Option<u32>,
    requests: mpsc::Receiver<CancelRequest>,
    registry: Arc<JobRegistry>,
    controls: Arc<Controls>,
    kill_grace: Duration,
}

impl Watcher {
    async fn run(self, mut child: Child) {
        let Watcher {
            id,
            pid,
            mut requests,
            registry,
            controls,
            kill_grace,
        } = self;
        let mut cancel_requested = false;
        let mut kill_deadline: Option<Instant> = None;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(request) = requests.recv() => {
                    let delivered = signal_child(pid, Termination::Terminate);
                    if delivered && !cancel_requested {
                        cancel_requested = true;
                        kill_deadline = Some(Instant::now() + kill_grace);
                        let _ = registry.update(&id, |job| job.cancel_requested = true);
                    }
                    let _ = request.delivered.send(delivered);
                }
                _ = sleep_until(kill_deadline) => {
                    warn!(job_id = %id, ?pid, "worker still running after SIGTERM, sending SIGKILL");
                    signal_child(pid, Termination::Kill);
                    kill_deadline = None;
                }
            }
        };

        controls.remove(&id);
        let outcome = Outcome::from_wait(status, cancel_requested);
        info!(
            job_id = %id,
            state = ?outcome.state,
            exit_code = ?outcome.exit_code,
            signal = ?outcome.signal,
            "worker exited"
        );

        let recorded = registry.update(&id, |job| {
            let finished = job.finish(outcome.state, outcome.exit_code, outcome.signal);
            if finished {
                job.error = outcome.error;
            }
            finished
        });
        if let Err(e) = recorded {
            warn!(job_id = %id, error = %e, "job vanished before exit was recorded");
        }
    }
}

fn signal_child(pid: Option<u32>, termination: Termination) -> bool {
    match pid {
        Some(pid) => send_signal(pid, termination),
        None => false,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug)]
struct Outcome {
    state: JobState,
    exit_code: Option<i32>,
    signal: Option<i32>,
    error: Option<String>,
}

impl Outcome {
    fn from_wait(status: io::Result<ExitStatus>, cancel_requested: bool) -> Self {
        match status {
            Ok(status) => Self {
                state: terminal_state(status.success(), cancel_requested),
                exit_code: status.code(),
                signal: exit_signal(&status),
                error: None,
            },
            Err(e) => Self {
                state: terminal_state(false, cancel_requested),
                exit_code: None,
                signal: None,
                error: Some(format!("failed to wait for worker: {e}")),
            },
        }
    }
}

/// A cancelled job is KILLED however it exits.
fn terminal_state(success: bool, cancel_requested: bool) -> JobState {
    if cancel_requested {
        JobState::Killed
    } else if success {
        JobState::Completed
    } else {
        JobState::Failed
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Terminate,
    Kill,
}

/// SIGTERM to the worker, SIGKILL to the worker's process group.
#[cfg(unix)]
fn send_signal(pid: u32, termination: Termination) -> bool {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let pid = Pid::from_raw(raw);
    let (signal, sent) = match termination {
        Termination::Terminate => (Signal::SIGTERM, kill(pid, Signal::SIGTERM)),
        Termination::Kill => (Signal::SIGKILL, killpg(pid, Signal::SIGKILL)),
    };
    match sent {
        Ok(()) => true,
        Err(e) => {
            debug!(pid = raw, signal = signal.as_str(), error = %e, "signal not delivered");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _termination: Termination) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state_classification() {
        assert_eq!(terminal_state(true, false), JobState::Completed);
        assert_eq!(terminal_state(false, false), JobState::Failed);
        assert_eq!(terminal_state(true, true), JobState::Killed);
        assert_eq!(terminal_state(false, true), JobState::Killed);
    }

    #[test]
    fn test_wait_error_is_failure() {
        let outcome = Outcome::from_wait(Err(io::Error::other("reaped elsewhere")), false);
        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.error.unwrap().contains("reaped elsewhere"));
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let supervisor = Supervisor::new(UnitCatalog::default(), SupervisorOptions::default());
        let first = supervisor.next_id("acres99");
        let second = supervisor.next_id("acres99");

        assert_ne!(first, second);
        assert!(first.starts_with("acres99_"));
        assert!(first.ends_with("_0001"));
        assert!(second.ends_with("_0002"));
    }

    #[test]
    fn test_option_defaults() {
        let options = SupervisorOptions::default();
        assert_eq!(options.output_dir, PathBuf::from("output"));
        assert_eq!(options.retention, Duration::from_secs(3600));
        assert_eq!(options.kill_grace, Duration::from_secs(10));
    }
}
