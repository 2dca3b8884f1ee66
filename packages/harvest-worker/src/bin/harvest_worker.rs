// Entry point for a harvest worker process

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use harvest_worker::browser::BrowserProcessFactory;
use harvest_worker::monitor::ProcessMemoryMonitor;
use harvest_worker::sink::JsonLinesSink;
use harvest_worker::unit_of_work::CommandExtractor;
use harvest_worker::upload::CommandUploader;
use harvest_worker::{ManagedResource, Subtask, Worker, WorkerSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Conventional exit status for a run stopped by a signal.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(true) => ExitCode::from(EXIT_CANCELLED),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("worker failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run was cancelled.
async fn run() -> Result<bool> {
    let settings = WorkerSettings::from_env().context("Failed to load configuration")?;
    tracing::info!(
        subtasks = settings.subtasks.len(),
        output = %settings.output.display(),
        "Starting harvest worker"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let resource = ManagedResource::new(
        BrowserProcessFactory::new(settings.browser.clone()),
        Arc::new(ProcessMemoryMonitor::current_process().with_descendants()),
        settings.policy.clone(),
    );
    let extractor = CommandExtractor::new(&settings.extractor_program, settings.extractor_args.clone());
    let sink = JsonLinesSink::open(&settings.output, settings.dedupe_fields.clone())
        .await
        .context("Failed to open output file")?;

    let mut worker = Worker::new(resource, extractor, sink, cancel).with_options(settings.options.clone());
    if let Some(program) = &settings.upload_program {
        worker = worker.with_uploader(Arc::new(CommandUploader::new(program, settings.upload_args.clone())));
    }

    let report = worker.run(Subtask::sequence(settings.subtasks)).await?;
    tracing::info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "worker report"
    );

    Ok(report.cancelled)
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => tracing::info!("SIGTERM received, stopping after current batch"),
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received, stopping after current batch"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, stopping after current batch");
    }

    cancel.cancel();
}
