//! In-memory job table.
//!
//! The registry is the only structure mutated concurrently: request handlers
//! register and remove jobs while watcher tasks apply exit transitions. Every
//! operation goes through a single `DashMap` shard lock, so `register`,
//! `update` and `remove` are atomic with respect to each other.
//!
//! Nothing is evicted automatically. [`JobRegistry::sweep`] drops terminal
//! jobs older than a retention window and is called by the supervisor before
//! every spawn.

use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::RegistryError;
use super::job::Job;

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job. Fails if the identifier is taken.
    pub fn register(&self, job: Job) -> Result<(), RegistryError> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateIdentifier(job.id)),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    /// Apply a mutation to a job under its entry lock.
    pub fn update<R>(&self, id: &str, mutation: impl FnOnce(&mut Job) -> R) -> Result<R, RegistryError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(mutation(&mut job))
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Evict a terminal job.
    pub fn remove(&self, id: &str) -> Result<Job, RegistryError> {
        match self.jobs.entry(id.to_string()) {
            Entry::Vacant(_) => Err(RegistryError::NotFound(id.to_string())),
            Entry::Occupied(entry) if !entry.get().is_terminal() => {
                Err(RegistryError::StillRunning(id.to_string()))
            }
            Entry::Occupied(entry) => Ok(entry.remove()),
        }
    }

    /// Drop terminal jobs that finished more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };

        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.is_terminal() && job.finished_at.is_some_and(|finished| finished < cutoff))
        });
        let swept = before.saturating_sub(self.jobs.len());
        if swept > 0 {
            tracing::debug!(swept, "swept finished jobs");
        }
        swept
    }

    /// Jobs that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|entry| !entry.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as TimeDelta;

    use super::*;
    use crate::kernel::jobs::job::JobState;

    fn job(id: &str) -> Job {
        Job::builder()
            .id(id)
            .unit("acres99")
            .log_path(format!("output/run_{id}.log"))
            .build()
    }

    fn finished(id: &str, ago: TimeDelta) -> Job {
        let mut job = job(id);
        job.finish(JobState::Completed, Some(0), None);
        job.finished_at = Some(Utc::now() - ago);
        job
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = JobRegistry::new();
        registry.register(job("a")).unwrap();

        let err = registry.register(job("a")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateIdentifier("a".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_applies_mutation() {
        let registry = JobRegistry::new();
        registry.register(job("a")).unwrap();

        let finished = registry
            .update("a", |job| {
                job.mark_running(Some(7));
                job.finish(JobState::Failed, Some(2), None)
            })
            .unwrap();

        assert!(finished);
        let stored = registry.get("a").unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.exit_code, Some(2));
    }

    #[test]
    fn test_update_missing_job() {
        let registry = JobRegistry::new();
        let err = registry.update("missing", |_| ()).unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".into()));
    }

    #[test]
    fn test_remove_running_job_fails_and_keeps_it() {
        let registry = JobRegistry::new();
        registry.register(job("a")).unwrap();
        registry.update("a", |job| job.mark_running(Some(1))).unwrap();

        let err = registry.remove("a").unwrap_err();
        assert_eq!(err, RegistryError::StillRunning("a".into()));
        assert!(registry.get("a").is_some());
    }

    #[test]
    fn test_remove_terminal_job() {
        let registry = JobRegistry::new();
        registry.register(finished("a", TimeDelta::zero())).unwrap();

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(registry.is_empty());
        assert_eq!(registry.remove("a").unwrap_err(), RegistryError::NotFound("a".into()));
    }

    #[test]
    fn test_sweep_respects_retention_and_state() {
        let registry = JobRegistry::new();
        registry.register(finished("old", TimeDelta::hours(2))).unwrap();
        registry.register(finished("recent", TimeDelta::minutes(5))).unwrap();
        registry.register(job("running")).unwrap();

        let swept = registry.sweep(Duration::from_secs(3600));

        assert_eq!(swept, 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("recent").is_some());
        assert!(registry.get("running").is_some());
    }

    #[test]
    fn test_list_is_ordered_and_counts_active() {
        let registry = JobRegistry::new();
        let mut first = job("first");
        first.started_at = Utc::now() - TimeDelta::seconds(10);
        registry.register(job("second")).unwrap();
        registry.register(first).unwrap();
        registry.register(finished("done", TimeDelta::zero())).unwrap();

        let ids: Vec<String> = registry.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids[0], "first");
        assert_eq!(registry.active_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_is_atomic() {
        let registry = Arc::new(JobRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.register(job("same")).is_ok() }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
