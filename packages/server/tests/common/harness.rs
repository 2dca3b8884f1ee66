//! Test harness for supervisor integration tests.
//!
//! Each test gets its own temporary directory holding the unit working
//! directory and the job logs, and a fresh supervisor over the shell units
//! in [`super::fixtures`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use harvest_server::kernel::jobs::{Job, Supervisor, SupervisorOptions};
use tempfile::TempDir;
use test_context::AsyncTestContext;

use super::fixtures::test_catalog;

/// Kill grace used by the tests; short so escalation tests stay fast.
pub const TEST_KILL_GRACE: Duration = Duration::from_millis(300);

/// Test harness that owns a supervisor and its output directory.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let handle = ctx.supervisor.start("quick", HashMap::new()).await.unwrap();
///     let job = ctx.wait_for_terminal(&handle.id).await.unwrap();
/// }
/// ```
pub struct TestHarness {
    pub supervisor: Arc<Supervisor>,
    pub dir: TempDir,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new(Duration::from_secs(3600))
            .expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Leave no worker behind
        for job in self.supervisor.list() {
            if !job.is_terminal() {
                let _ = self.supervisor.cancel(&job.id).await;
            }
        }
    }
}

impl TestHarness {
    pub fn new(retention: Duration) -> Result<Self> {
        // Uses try_init() to avoid panicking if already initialized.
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dir = tempfile::tempdir()?;
        let options = SupervisorOptions::builder()
            .output_dir(dir.path().join("output"))
            .retention(retention)
            .kill_grace(TEST_KILL_GRACE)
            .build();
        let supervisor = Arc::new(Supervisor::new(test_catalog(dir.path()), options));

        Ok(Self { supervisor, dir })
    }

    pub async fn start(&self, unit: &str) -> Result<String> {
        let handle = self.supervisor.start(unit, HashMap::new()).await?;
        Ok(handle.id)
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: &str) -> Result<Job> {
        for _ in 0..200 {
            match self.supervisor.status(id) {
                Some(job) if job.is_terminal() => return Ok(job),
                Some(_) => tokio::time::sleep(Duration::from_millis(25)).await,
                None => bail!("job {id} disappeared"),
            }
        }
        bail!("job {id} did not finish in time")
    }

    /// Poll the job log until it contains `needle`.
    pub async fn wait_for_log(&self, id: &str, needle: &str) -> Result<String> {
        for _ in 0..200 {
            let log = self.full_log(id).await?;
            if log.contains(needle) {
                return Ok(log);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        bail!("job {id} log never contained {needle:?}")
    }

    pub async fn full_log(&self, id: &str) -> Result<String> {
        let mut log = String::new();
        let mut offset = 0;
        loop {
            let chunk = self.supervisor.read_log(id, offset, 4096).await?;
            log.push_str(&chunk.data);
            offset = chunk.next_offset;
            if chunk.eof {
                return Ok(log);
            }
        }
    }
}
