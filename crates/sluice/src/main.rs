//! Sluice CLI: migrates a key/value table export into warehouse load jobs.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use sluice::{CliArgs, Config, init_recorder, init_tracing, run_migration};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.log_format);

    let metrics = if config.metrics.enabled() {
        match init_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("Failed to initialize metrics: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    info!(
        "Starting migration ({} -> {}/{})",
        config.source.uri, config.destination.uri, config.destination.dataset
    );

    let result = run_migration(&config, args.dry_run).await;

    if let (Some(handle), Some(path)) = (&metrics, &config.metrics.textfile_path) {
        if let Err(e) = handle.write_snapshot(path) {
            error!(error = %e, "Failed to write metrics snapshot");
        }
    }

    match result {
        Ok(stats) => {
            if stats.jobs_failed > 0 {
                warn!(failed = stats.jobs_failed, "Migration finished with failed load jobs");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Migration failed");
            eprintln!("Migration failed: {e}");
            ExitCode::FAILURE
        }
    }
}
