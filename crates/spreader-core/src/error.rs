use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("State serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Checkpoint was recorded with {field} '{persisted}' but this run uses '{requested}'; \
         refusing to resume"
    )]
    RestartMismatch {
        field: &'static str,
        persisted: String,
        requested: String,
    },

    #[error("Could not lock state file '{}': {source}", path.display())]
    LockUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No usable subfolder under '{}'", .0.display())]
    NoSubfolders(PathBuf),

    #[error("{0}")]
    Other(String),
}
