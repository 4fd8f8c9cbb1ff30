use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "spreader")]
#[command(about = "Spread files across capped subfolders, resumably", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Distribute every file under the source folder into target subfolders
    Run(RunArgs),
    /// Show the checkpoint currently on disk without modifying it
    Status {
        /// State file to inspect (defaults to the configured one)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Print configuration values
    PrintConfig,
}

/// Overrides for `Config.toml` / `SPREADER_*` values.
#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long)]
    pub source: Option<PathBuf>,
    #[arg(long)]
    pub target: Option<PathBuf>,
    #[arg(long)]
    pub files_per_folder: Option<usize>,
    /// recycle-bin, immediate or deferred
    #[arg(long)]
    pub delete_mode: Option<String>,
    /// Condition for deferred deletion: no-warnings-or-errors or no-errors
    #[arg(long)]
    pub deletion_gate: Option<String>,
    /// Resume from the last checkpoint instead of starting over
    #[arg(long)]
    pub restart: bool,
    #[arg(long)]
    pub state_file: Option<PathBuf>,
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,
    /// Attempts per operation, 0 for unlimited
    #[arg(long)]
    pub retry_count: Option<u32>,
    #[arg(long)]
    pub max_backoff_ms: Option<u64>,
}
