pub mod config;
pub mod deletion;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod naming;
pub mod placement;
pub mod platform;
pub mod progress;
pub mod retry;
pub mod scanner;
pub mod state;

pub use config::{AppConfig, DeleteMode, DeletionGate, RetryPolicy, RunConfig};
pub use diagnostics::{LogCounts, RunLog};
pub use engine::{DistributionEngine, RunSummary};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use state::{Checkpoint, StateStore};
