//! Browser session as a managed resource.
//!
//! A browser instance is a child process launched from a configured command
//! (for example `chromium --headless --remote-debugging-port=9222`). The
//! extractor reaches it through the endpoint and pid exported by
//! [`BrowserProcess::env`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ResourceError;
use crate::resource::ResourceFactory;

#[derive(Debug, Clone)]
pub struct BrowserCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Address extractors use to attach, exported as `HARVEST_BROWSER_ENDPOINT`.
    pub endpoint: Option<String>,
    /// How long the process must stay up before it counts as started.
    pub startup_grace: Duration,
    /// How long to wait for the process to exit after it was killed.
    pub shutdown_timeout: Duration,
}

impl BrowserCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            endpoint: None,
            startup_grace: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }
}

/// A running browser process.
pub struct BrowserProcess {
    child: Mutex<Child>,
    pid: u32,
    endpoint: Option<String>,
}

impl BrowserProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Environment handed to extractors so they can attach to this session.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![("HARVEST_BROWSER_PID".to_string(), self.pid.to_string())];
        if let Some(endpoint) = &self.endpoint {
            env.push(("HARVEST_BROWSER_ENDPOINT".to_string(), endpoint.clone()));
        }
        env
    }
}

pub struct BrowserProcessFactory {
    command: BrowserCommand,
}

impl BrowserProcessFactory {
    pub fn new(command: BrowserCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ResourceFactory for BrowserProcessFactory {
    type Handle = BrowserProcess;

    async fn create(&self) -> Result<BrowserProcess, ResourceError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ResourceError::Creation(format!("{}: {}", self.command.program.display(), e))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| ResourceError::Creation("browser exited before reporting a pid".into()))?;

        // A browser that dies during startup (bad flags, missing display) is a
        // creation failure, not a healthy session.
        match tokio::time::timeout(self.command.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                return Err(ResourceError::Creation(format!(
                    "browser exited during startup with {}",
                    status
                )));
            }
            Ok(Err(e)) => return Err(ResourceError::Creation(e.to_string())),
            Err(_) => {}
        }

        info!(pid, program = %self.command.program.display(), "browser started");
        Ok(BrowserProcess {
            child: Mutex::new(child),
            pid,
            endpoint: self.command.endpoint.clone(),
        })
    }

    async fn destroy(&self, browser: BrowserProcess) -> Result<(), ResourceError> {
        let mut child = browser.child.into_inner();

        if let Err(e) = child.start_kill() {
            // Already exited; reap it below.
            debug!(pid = browser.pid, error = %e, "browser kill failed");
        }

        match tokio::time::timeout(self.command.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = browser.pid, %status, "browser exited");
                Ok(())
            }
            Ok(Err(e)) => Err(ResourceError::Destruction(e.to_string())),
            Err(_) => Err(ResourceError::Destruction(format!(
                "browser {} did not exit within {:?}",
                browser.pid, self.command.shutdown_timeout
            ))),
        }
    }
}
