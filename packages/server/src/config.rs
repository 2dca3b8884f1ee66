use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::kernel::jobs::SupervisorOptions;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub output_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub retention: Duration,
    pub kill_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            output_dir: env::var("HARVEST_OUTPUT_DIR")
                .unwrap_or_else(|_| "output".to_string())
                .into(),
            catalog_path: env::var("HARVEST_CATALOG")
                .unwrap_or_else(|_| "units.json".to_string())
                .into(),
            retention: Duration::from_secs(
                env::var("HARVEST_RETENTION_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .context("HARVEST_RETENTION_SECS must be a number of seconds")?,
            ),
            kill_grace: Duration::from_secs(
                env::var("HARVEST_KILL_GRACE_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("HARVEST_KILL_GRACE_SECS must be a number of seconds")?,
            ),
        })
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions::builder()
            .output_dir(self.output_dir.clone())
            .retention(self.retention)
            .kill_grace(self.kill_grace)
            .build()
    }
}
