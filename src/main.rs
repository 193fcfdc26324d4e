//! drive-share - Bulk Folder Sharing from a Spreadsheet
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use drive_share::config::{CliArgs, Command, MonitorArgs, TailArgs, WorkArgs};
use drive_share::drive::GoogleDrive;
use drive_share::http::ApiClient;
use drive_share::monitor;
use drive_share::progress::{print_header, print_summary};
use drive_share::resolver::ResolutionCache;
use drive_share::sheet::GoogleSheets;
use drive_share::worklog::WorkLog;
use drive_share::{BatchProcessor, MonitorConfig, TailConfig, WorkerConfig};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.debug)?;

    match args.command {
        Command::Work(work) => run_work(work),
        Command::Monitor(monitor) => run_monitor(monitor),
        Command::Tail(tail) => run_tail(tail),
    }
}

/// Install the Ctrl-C handler on `flag`
fn install_interrupt(flag: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")
}

fn run_work(args: WorkArgs) -> Result<()> {
    // Validate and create config
    let config = WorkerConfig::from_args(&args).context("Invalid configuration")?;
    let token = args
        .access_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .context("Missing access token (GOOGLE_ACCESS_TOKEN)")?;

    let cache = match &config.folder_cache {
        Some(path) => {
            let cache = ResolutionCache::load(path).context("Failed to load folder cache")?;
            info!(path = %path.display(), entries = cache.len(), "Folder cache loaded");
            cache
        }
        None => ResolutionCache::empty(),
    };

    let api = ApiClient::new(token).context("Failed to create HTTP client")?;
    let sheet = Arc::new(GoogleSheets::new(
        api.clone(),
        config.spreadsheet_id.clone(),
        config.sheet_name.clone(),
    ));
    let drive = Arc::new(GoogleDrive::new(api));

    let slot = if config.shard.is_enabled() { config.shard.index } else { 0 };
    let worklog = WorkLog::create(&config.log_dir, slot)
        .with_context(|| format!("Failed to create log file in {}", config.log_dir.display()))?;

    if config.show_progress {
        print_header(&config, &worklog.path().display().to_string());
    }

    let config = Arc::new(config);
    let processor = BatchProcessor::new(config.clone(), sheet, drive, cache, worklog);
    install_interrupt(processor.shutdown_flag())?;

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    let summary = runtime
        .block_on(processor.run())
        .context("Worker run failed")?;

    if config.show_progress && summary.cycles > 1 {
        print_summary(&summary.totals);
    }

    if summary.interrupted {
        info!("Run was interrupted; unfinished records stay eligible");
    }
    info!(
        cycles = summary.cycles,
        granted = summary.totals.granted,
        errors = summary.totals.errors,
        remote_attempts = processor.remote_attempts(),
        "Worker finished"
    );

    Ok(())
}

fn run_monitor(args: MonitorArgs) -> Result<()> {
    let config = MonitorConfig::from_args(&args).context("Invalid configuration")?;
    let shutdown = Arc::new(AtomicBool::new(false));
    install_interrupt(shutdown.clone())?;

    monitor::run_table(&config, shutdown).context("Monitor failed")?;
    Ok(())
}

fn run_tail(args: TailArgs) -> Result<()> {
    let config = TailConfig::from_args(&args).context("Invalid configuration")?;
    let shutdown = Arc::new(AtomicBool::new(false));
    install_interrupt(shutdown.clone())?;

    monitor::run_tail(&config, shutdown).context("Tail failed")?;
    Ok(())
}

fn setup_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("drive_share=debug,warn")
    } else {
        EnvFilter::new("drive_share=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
