//! The sequential worker loop.
//!
//! One loop, one resource instance, one sub-task at a time:
//!
//! ```text
//! for subtask in work list (in order):
//!     handle = resource.acquire()          creation failure ends the worker
//!     batch  = collect(work.run(subtask))  partial records kept on error
//!     sink.persist(batch.records)          before the error is recorded
//!     resource.record_served()
//!     upload artifact                      best-effort
//!     if more work and policy says so:
//!         resource.restart()               only ever between sub-tasks
//! resource.release()                       on every exit path
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::error::{SubtaskError, WorkerError};
use crate::resource::{ManagedResource, ResourceFactory, RestartReason};
use crate::sink::RecordSink;
use crate::unit_of_work::{collect_batch, BatchResult, Subtask, UnitOfWork};
use crate::upload::{upload_best_effort, ArtifactUploader};

#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct WorkerOptions {
    /// Restart the resource after a failed sub-task, not only under the policy.
    #[builder(default)]
    pub restart_on_failure: bool,
    /// Abort after this many failed sub-tasks in a row. `None` never aborts.
    #[builder(default)]
    pub max_consecutive_failures: Option<usize>,
    #[builder(default)]
    pub subtask_timeout: Option<Duration>,
    /// Pause between sub-tasks.
    #[builder(default)]
    pub subtask_delay: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskReport {
    pub key: String,
    pub position: usize,
    /// Records produced, including any before a failure.
    pub records: usize,
    /// Rows written after de-duplication.
    pub persisted: usize,
    pub resource_generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartReason>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub subtasks: Vec<SubtaskReport>,
    pub resources_created: u64,
    pub restarts: u64,
    pub cancelled: bool,
}

impl WorkerReport {
    pub fn records_persisted(&self) -> usize {
        self.subtasks.iter().map(|s| s.persisted).sum()
    }

    pub fn failures(&self) -> usize {
        self.subtasks.iter().filter(|s| s.error.is_some()).count()
    }
}

pub struct Worker<F: ResourceFactory, U, S> {
    resource: ManagedResource<F>,
    work: U,
    sink: S,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    options: WorkerOptions,
    cancel: CancellationToken,
}

impl<F, U, S> Worker<F, U, S>
where
    F: ResourceFactory,
    U: UnitOfWork<F::Handle>,
    S: RecordSink,
{
    pub fn new(resource: ManagedResource<F>, work: U, sink: S, cancel: CancellationToken) -> Self {
        Self {
            resource,
            work,
            sink,
            uploader: None,
            options: WorkerOptions::default(),
            cancel,
        }
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ArtifactUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Process `subtasks` in order. The resource is released whatever the outcome.
    pub async fn run(mut self, subtasks: Vec<Subtask>) -> Result<WorkerReport, WorkerError> {
        let mut report = WorkerReport::default();

        let result = self.drive(&subtasks, &mut report).await;
        self.resource.release().await;
        self.upload_artifact().await;

        report.resources_created = self.resource.created_count();
        report.restarts = self.resource.restart_count();

        info!(
            subtasks = report.subtasks.len(),
            records = report.records_persisted(),
            failures = report.failures(),
            resources_created = report.resources_created,
            cancelled = report.cancelled,
            "worker finished"
        );

        result.map(|()| report)
    }

    async fn drive(&mut self, subtasks: &[Subtask], report: &mut WorkerReport) -> Result<(), WorkerError> {
        let total = subtasks.len();
        let mut consecutive_failures = 0;

        for (index, subtask) in subtasks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let handle = self
                .resource
                .acquire()
                .await
                .map_err(WorkerError::ResourceCreation)?;
            let stream = self.work.run(subtask, handle);
            let generation = self.resource.generation().unwrap_or_default();
            info!(subtask = %subtask.key, position = subtask.position, total, generation, "sub-task started");

            let BatchResult { records, error } =
                collect_batch(stream, &self.cancel, self.options.subtask_timeout).await;

            let produced = records.len();
            let persisted = self
                .sink
                .persist(subtask, records)
                .await
                .map_err(|source| WorkerError::Persistence {
                    key: subtask.key.clone(),
                    source,
                })?;
            self.resource.record_served();

            let cancelled = matches!(error, Some(SubtaskError::Cancelled));
            match &error {
                None => {
                    consecutive_failures = 0;
                    info!(subtask = %subtask.key, produced, persisted, "sub-task completed");
                }
                Some(e) => {
                    if !cancelled {
                        consecutive_failures += 1;
                    }
                    warn!(subtask = %subtask.key, produced, persisted, error = %e, "sub-task failed");
                }
            }

            let mut subtask_report = SubtaskReport {
                key: subtask.key.clone(),
                position: subtask.position,
                records: produced,
                persisted,
                resource_generation: generation,
                error: error.as_ref().map(|e| e.to_string()),
                restart: None,
            };

            if cancelled {
                report.subtasks.push(subtask_report);
                report.cancelled = true;
                break;
            }

            self.upload_artifact().await;

            if let Some(limit) = self.options.max_consecutive_failures {
                if consecutive_failures >= limit {
                    report.subtasks.push(subtask_report);
                    return Err(WorkerError::TooManyFailures(consecutive_failures));
                }
            }

            let has_next = index + 1 < total;
            if has_next {
                let reason = self.resource.restart_reason().or_else(|| {
                    (error.is_some() && self.options.restart_on_failure)
                        .then_some(RestartReason::SubtaskFailed)
                });
                if let Some(reason) = reason {
                    info!(subtask = %subtask.key, ?reason, "restarting resource");
                    self.resource
                        .restart()
                        .await
                        .map_err(WorkerError::ResourceCreation)?;
                    subtask_report.restart = Some(reason);
                }
            }
            report.subtasks.push(subtask_report);

            if has_next && !self.options.subtask_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.options.subtask_delay) => {}
                }
            }
        }

        Ok(())
    }

    async fn upload_artifact(&self) {
        let Some(uploader) = &self.uploader else {
            return;
        };
        let Some(path) = self.sink.artifact().map(PathBuf::from) else {
            return;
        };
        upload_best_effort(uploader.as_ref(), &path).await;
    }
}
