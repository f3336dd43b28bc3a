//! warc-drain - WARC directory uploader
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warc_drain::config::{CliArgs, DrainConfig, JobContext};
use warc_drain::credentials::{self, Credentials};
use warc_drain::progress::{print_header, print_summary, LogWriter, ProgressReporter};
use warc_drain::upload::{DryRunStore, IaS3Client, InFlightRegistry, ObjectStoreClient, UploadDispatcher};
use warc_drain::watcher::{shutdown, ShutdownRequest, WatchLoop, WatchOutcome};

/// Exit status after a forced shutdown (128 + SIGINT)
const FORCED_EXIT_CODE: i32 = 130;

/// How often the progress line is refreshed
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    let logs = LogWriter::default();
    setup_logging(args.verbose, args.json_logs, logs.clone())?;

    let (config, credentials) = load(&args).context("Failed to start")?;

    if config.show_progress {
        print_header(
            &config.job.warcs_dir,
            &config.job.job,
            config.threads,
            config.job.item_size_bytes,
            if config.dry_run { "(dry run)" } else { config.endpoint.as_str() },
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let code = runtime.block_on(run_watch(config, credentials, logs))?;
    Ok(code)
}

/// Credentials first, then the validated job config
fn load(args: &CliArgs) -> warc_drain::Result<(DrainConfig, Credentials)> {
    let credentials = credentials::resolve(
        args.s3_access_key.as_deref(),
        args.s3_secret_key.as_deref(),
        args.s3_creds_file.as_deref(),
    )?;
    let config = DrainConfig::from_args(args)?;
    Ok((config, credentials))
}

async fn run_watch(
    config: DrainConfig,
    credentials: Credentials,
    logs: LogWriter,
) -> warc_drain::Result<ExitCode> {
    let client: Arc<dyn ObjectStoreClient> = if config.dry_run {
        Arc::new(DryRunStore::new())
    } else {
        Arc::new(IaS3Client::new(&config.endpoint)?)
    };

    let context = Arc::new(JobContext::new(config.job.clone(), credentials));
    let dispatcher = UploadDispatcher::new(
        Arc::clone(&context),
        client,
        InFlightRegistry::new(),
        config.threads,
    )
    .with_delete_uploaded(config.delete_uploaded);

    // First Ctrl+C drains, second exits
    let (controller, listener) = shutdown::channel();
    ctrlc::set_handler(move || match controller.signal() {
        ShutdownRequest::Graceful => {
            eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        }
        _ => {
            eprintln!("\nForce shutdown!");
        }
    })?;

    let progress = config.show_progress.then(|| Arc::new(ProgressReporter::new()));
    let progress_task = progress.as_ref().map(|p| {
        logs.attach(p);
        let p = Arc::clone(p);
        let dispatcher = dispatcher.clone();
        p.set_status("Waiting for first scan...");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                ticker.tick().await;
                p.update(&dispatcher.snapshot());
            }
        })
    });

    let mut watcher = WatchLoop::new(context, dispatcher);
    let result = watcher.run(listener).await;

    if let Some(task) = progress_task {
        task.abort();
    }
    if let Some(p) = &progress {
        logs.detach();
        p.finish_and_clear();
    }

    let forced = matches!(result.outcome, WatchOutcome::Abandoned { .. });
    if config.show_progress {
        print_summary(&result.uploads, result.items, result.duration, forced);
    }

    info!(
        started_at = %result.started_at.to_rfc3339(),
        ticks = result.ticks,
        items = result.items,
        uploaded = result.uploads.succeeded,
        failed = result.uploads.failed,
        bytes = result.uploads.bytes_uploaded,
        duration_secs = result.duration.as_secs(),
        "Watcher stopped"
    );

    match result.outcome {
        WatchOutcome::Drained => Ok(ExitCode::SUCCESS),
        WatchOutcome::Abandoned { outstanding } => {
            warn!(outstanding, "Exiting with uploads still running");
            // Blocking reads inside the runtime would hold up its shutdown
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
}

fn setup_logging(verbose: bool, json: bool, writer: LogWriter) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("warc_drain=debug,warn")
    } else {
        EnvFilter::new("warc_drain=info,warn")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}
