use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::BrowserCommand;
use crate::resource::RestartPolicy;
use crate::worker::WorkerOptions;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub subtasks: Vec<String>,
    pub browser: BrowserCommand,
    pub extractor_program: PathBuf,
    pub extractor_args: Vec<String>,
    pub output: PathBuf,
    pub dedupe_fields: Vec<String>,
    pub policy: RestartPolicy,
    pub options: WorkerOptions,
    pub upload_program: Option<PathBuf>,
    pub upload_args: Vec<String>,
}

impl WorkerSettings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let subtasks = match (var("HARVEST_SUBTASKS"), var("HARVEST_SUBTASKS_FILE")) {
            (Some(list), _) => split_list(&list),
            (None, Some(file)) => {
                let contents = std::fs::read_to_string(&file)
                    .with_context(|| format!("HARVEST_SUBTASKS_FILE {file} could not be read"))?;
                parse_subtask_file(&contents)
            }
            (None, None) => bail!("HARVEST_SUBTASKS or HARVEST_SUBTASKS_FILE must be set"),
        };

        let browser = BrowserCommand::new(var("HARVEST_BROWSER").context("HARVEST_BROWSER must be set")?)
            .with_args(split_args(var("HARVEST_BROWSER_ARGS")))
            .with_endpoint(var("HARVEST_BROWSER_ENDPOINT"));

        let memory_threshold_mb: u64 = parse_or(&var, "HARVEST_MEMORY_THRESHOLD_MB", 1536)?;
        let memory_threshold_bytes = memory_threshold_mb
            .checked_mul(1024 * 1024)
            .with_context(|| format!("HARVEST_MEMORY_THRESHOLD_MB is too large: {memory_threshold_mb}"))?;
        let policy = RestartPolicy::builder()
            .restart_after(parse_or(&var, "HARVEST_RESTART_AFTER", 10)?)
            .memory_threshold_bytes(memory_threshold_bytes)
            .build();

        let options = WorkerOptions::builder()
            .restart_on_failure(parse_or(&var, "HARVEST_RESTART_ON_FAILURE", false)?)
            .max_consecutive_failures(parse_opt(&var, "HARVEST_MAX_CONSECUTIVE_FAILURES")?)
            .subtask_timeout(parse_opt(&var, "HARVEST_SUBTASK_TIMEOUT_SECS")?.map(Duration::from_secs))
            .subtask_delay(Duration::from_millis(parse_or(&var, "HARVEST_SUBTASK_DELAY_MS", 0)?))
            .build();

        Ok(Self {
            subtasks,
            browser,
            extractor_program: var("HARVEST_EXTRACTOR")
                .context("HARVEST_EXTRACTOR must be set")?
                .into(),
            extractor_args: split_args(var("HARVEST_EXTRACTOR_ARGS")),
            output: var("HARVEST_OUTPUT")
                .unwrap_or_else(|| "output/records.jsonl".to_string())
                .into(),
            dedupe_fields: var("HARVEST_DEDUPE_FIELDS")
                .map(|fields| split_list(&fields))
                .unwrap_or_default(),
            policy,
            options,
            upload_program: var("HARVEST_UPLOAD_COMMAND").map(PathBuf::from),
            upload_args: split_args(var("HARVEST_UPLOAD_ARGS")),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("{key} has an invalid value: {raw}"))
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn split_args(raw: Option<String>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// One key per line; blank lines and `#` comments are skipped.
fn parse_subtask_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
