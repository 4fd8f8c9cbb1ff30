use crate::error::Error;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_FILES_PER_FOLDER: usize = 20_000;
pub const DEFAULT_STATE_FILE: &str = "spreader_state.json";

/// What happens to a source file once its copy has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteMode {
    #[default]
    RecycleBin,
    Immediate,
    Deferred,
}

/// Condition the aggregated counters must satisfy before deferred deletions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionGate {
    #[default]
    NoWarningsOrErrors,
    NoErrors,
}

impl DeleteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteMode::RecycleBin => "recycle-bin",
            DeleteMode::Immediate => "immediate",
            DeleteMode::Deferred => "deferred",
        }
    }
}

impl DeletionGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionGate::NoWarningsOrErrors => "no-warnings-or-errors",
            DeletionGate::NoErrors => "no-errors",
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeletionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeleteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recycle-bin" | "recyclebin" | "trash" => Ok(DeleteMode::RecycleBin),
            "immediate" => Ok(DeleteMode::Immediate),
            "deferred" | "end-of-script" => Ok(DeleteMode::Deferred),
            other => Err(Error::InvalidArgument(format!(
                "unknown delete mode '{}' (expected recycle-bin, immediate or deferred)",
                other
            ))),
        }
    }
}

impl FromStr for DeletionGate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no-warnings-or-errors" => Ok(DeletionGate::NoWarningsOrErrors),
            "no-errors" => Ok(DeletionGate::NoErrors),
            other => Err(Error::InvalidArgument(format!(
                "unknown deletion gate '{}' (expected no-warnings-or-errors or no-errors)",
                other
            ))),
        }
    }
}

/// Exponential backoff settings shared by file I/O and lock acquisition.
///
/// `max_attempts == 0` retries forever; the delay is still capped at
/// `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 3,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts. Mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            max_attempts,
            max_backoff_ms: 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }
}

/// Settings as read from `Config.toml` and `SPREADER_*` environment variables.
/// Source and target are usually supplied on the command line instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_folder: Option<PathBuf>,
    pub target_folder: Option<PathBuf>,
    pub files_per_folder: usize,
    pub delete_mode: DeleteMode,
    pub deletion_gate: DeletionGate,
    pub state_file: PathBuf,
    pub ignore_patterns: Vec<String>,
    pub name_length: usize,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_folder: None,
            target_folder: None,
            files_per_folder: DEFAULT_FILES_PER_FOLDER,
            delete_mode: DeleteMode::default(),
            deletion_gate: DeletionGate::default(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            ignore_patterns: Vec::new(),
            name_length: 12,
            retry: RetryPolicy::default(),
        }
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("SPREADER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Fully specified settings for one distribution run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_folder: PathBuf,
    pub target_folder: PathBuf,
    pub files_per_folder: usize,
    pub delete_mode: DeleteMode,
    pub deletion_gate: DeletionGate,
    pub state_file: PathBuf,
    pub ignore_patterns: Vec<String>,
    pub name_length: usize,
    pub retry: RetryPolicy,
}

impl RunConfig {
    pub fn new(source_folder: impl Into<PathBuf>, target_folder: impl Into<PathBuf>) -> Self {
        let defaults = AppConfig::default();
        Self {
            source_folder: source_folder.into(),
            target_folder: target_folder.into(),
            files_per_folder: defaults.files_per_folder,
            delete_mode: defaults.delete_mode,
            deletion_gate: defaults.deletion_gate,
            state_file: defaults.state_file,
            ignore_patterns: defaults.ignore_patterns,
            name_length: defaults.name_length,
            retry: defaults.retry,
        }
    }
}

impl TryFrom<AppConfig> for RunConfig {
    type Error = Error;

    fn try_from(config: AppConfig) -> Result<Self, Self::Error> {
        let source_folder = config
            .source_folder
            .ok_or_else(|| Error::InvalidArgument("source folder is required".to_string()))?;
        let target_folder = config
            .target_folder
            .ok_or_else(|| Error::InvalidArgument("target folder is required".to_string()))?;

        Ok(RunConfig {
            source_folder,
            target_folder,
            files_per_folder: config.files_per_folder,
            delete_mode: config.delete_mode,
            deletion_gate: config.deletion_gate,
            state_file: config.state_file,
            ignore_patterns: config.ignore_patterns,
            name_length: config.name_length,
            retry: config.retry,
        })
    }
}

/// True when one path equals or contains the other.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
