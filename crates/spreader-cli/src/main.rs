mod commands;
mod logging;
mod progress;

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RunArgs};
use dotenv::dotenv;
use progress::CliReporter;
use spreader_core::state::StateSource;
use spreader_core::{AppConfig, DistributionEngine, RunConfig, RunSummary, StateStore};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match spreader_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Run(run_args)) => {
            if let Err(err) = run_distribution(config, run_args) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::Status { state_file }) => {
            print_status(state_file.unwrap_or(config.state_file));
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }
}

/// Command-line values win over `Config.toml` and the environment.
fn apply_overrides(mut config: AppConfig, args: &RunArgs) -> anyhow::Result<AppConfig> {
    if let Some(source) = &args.source {
        config.source_folder = Some(source.clone());
    }
    if let Some(target) = &args.target {
        config.target_folder = Some(target.clone());
    }
    if let Some(limit) = args.files_per_folder {
        config.files_per_folder = limit;
    }
    if let Some(mode) = &args.delete_mode {
        config.delete_mode = mode.parse()?;
    }
    if let Some(gate) = &args.deletion_gate {
        config.deletion_gate = gate.parse()?;
    }
    if let Some(state_file) = &args.state_file {
        config.state_file = state_file.clone();
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry.base_delay_ms = delay;
    }
    if let Some(count) = args.retry_count {
        config.retry.max_attempts = count;
    }
    if let Some(cap) = args.max_backoff_ms {
        config.retry.max_backoff_ms = cap;
    }
    Ok(config)
}

fn run_distribution(config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = apply_overrides(config, &args)?;
    let run_config = RunConfig::try_from(config).context("incomplete run configuration")?;
    let engine = DistributionEngine::new(run_config);
    let reporter = CliReporter::new();

    let summary = engine
        .run(args.restart, &reporter)
        .context("distribution aborted")?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    info!(
        "Session {} ({}), resumed from checkpoint {}, reached {}",
        summary.session_id.cyan(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
        summary.resumed_from,
        summary.reached
    );
    info!(
        "{} placed, {} failed, {} skipped, {} over cap, {} subfolders created",
        format!("{}", summary.placement.placed).green(),
        format!("{}", summary.placement.failed).red(),
        summary.placement.skipped,
        format!("{}", summary.placement.fallbacks).yellow(),
        summary.subfolders_created
    );
    if let Some(drain) = &summary.drain {
        info!(
            "Deferred deletion: {}, {} deleted, {} changed, {} missing, {} from other sessions",
            if drain.gate_passed {
                "ran".green()
            } else {
                "skipped".yellow()
            },
            drain.deleted,
            drain.changed,
            drain.missing,
            drain.foreign
        );
    }
    if summary.final_count_matches == Some(false) {
        warn!("Final file count did not match; see the log for details");
    }
    info!(
        "{} warnings, {} errors",
        format!("{}", summary.counts.warnings).yellow(),
        format!("{}", summary.counts.errors).red()
    );
    if !summary.completed {
        info!("Stopped early; run again with --restart to continue");
    }
}

fn print_status(state_file: PathBuf) {
    let store = StateStore::new(state_file);
    let status = store.inspect();

    println!("State file: {}", store.path().display());
    println!(
        "  primary: {}, backup: {}, checksum: {}",
        present(status.primary_exists),
        present(status.backup_exists),
        match status.checksum_matches {
            Some(true) => "matches".green(),
            Some(false) => "MISMATCH".red(),
            None if status.checksum_exists => "present".normal(),
            None => "missing".dimmed(),
        }
    );

    match (&status.state, status.source) {
        (Some(state), source) => {
            if source == StateSource::Backup {
                println!("  {}", "primary unusable, backup would be used".yellow());
            }
            println!("  checkpoint: {}", state.checkpoint.to_string().cyan());
            println!(
                "  session: {}",
                state.session_id.as_deref().unwrap_or("(none)")
            );
            println!("  source: {}", state.source_folder.display());
            println!("  delete mode: {}", state.delete_mode);
            println!("  saved at: {}", state.saved_at.to_rfc3339());
            println!(
                "  warnings: {}, errors: {}",
                state.warnings_so_far, state.errors_so_far
            );
            if let Some(totals) = &state.totals {
                println!(
                    "  files: {} in source, {} already in target",
                    totals.source_files, totals.target_files_before
                );
            }
            if let Some(pending) = &state.pending_deletions {
                println!("  pending deletions: {}", pending.len());
            }
        }
        (None, _) => println!("  {}", "no resumable checkpoint".dimmed()),
    }

    if status.journal_exists {
        println!(
            "  {}",
            "deletion journal present: distribution was interrupted".yellow()
        );
    }

    for path in &status.quarantined {
        println!("  quarantined: {}", path.display().to_string().red());
    }
}

fn present(exists: bool) -> ColoredString {
    if exists {
        "present".green()
    } else {
        "missing".dimmed()
    }
}
