use crate::config::DeleteMode;
use crate::deletion::PendingDeletion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Newest state layout this build can read.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Last phase whose effects were committed. Serialized as its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Checkpoint {
    Fresh = 0,
    Prepared = 1,
    Enumerated = 2,
    Distributed = 3,
    Redistributed = 4,
}

impl Checkpoint {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Checkpoint::Fresh => "fresh",
            Checkpoint::Prepared => "prepared",
            Checkpoint::Enumerated => "enumerated",
            Checkpoint::Distributed => "distributed",
            Checkpoint::Redistributed => "redistributed",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

impl From<Checkpoint> for u8 {
    fn from(checkpoint: Checkpoint) -> u8 {
        checkpoint.number()
    }
}

impl TryFrom<u8> for Checkpoint {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Checkpoint::Fresh),
            1 => Ok(Checkpoint::Prepared),
            2 => Ok(Checkpoint::Enumerated),
            3 => Ok(Checkpoint::Distributed),
            4 => Ok(Checkpoint::Redistributed),
            other => Err(format!("checkpoint {} out of range 0-4", other)),
        }
    }
}

/// Output of the enumeration phase; only needed to run the primary distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationPayload {
    pub source_files: Vec<PathBuf>,
    pub subfolders: Vec<PathBuf>,
}

/// File counts taken before anything was moved, used by the final consistency check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTotals {
    pub source_files: usize,
    pub target_files_before: usize,
}

impl FileTotals {
    pub fn expected_after(&self) -> usize {
        self.source_files + self.target_files_before
    }
}

/// Persisted checkpoint record. Rewritten whole after every phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub checkpoint: Checkpoint,
    /// Absent in states written before sessions existed.
    #[serde(default)]
    pub session_id: Option<String>,
    pub warnings_so_far: u64,
    pub errors_so_far: u64,
    pub source_folder: PathBuf,
    pub delete_mode: DeleteMode,
    pub saved_at: DateTime<Utc>,
    /// Present at checkpoint 2 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<EnumerationPayload>,
    /// Present from checkpoint 2 on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals: Option<FileTotals>,
    /// Present from checkpoint 3 on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_deletions: Option<Vec<PendingDeletion>>,
}

impl RunState {
    pub fn new(session_id: String, source_folder: PathBuf, delete_mode: DeleteMode) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            checkpoint: Checkpoint::Fresh,
            session_id: Some(session_id),
            warnings_so_far: 0,
            errors_so_far: 0,
            source_folder,
            delete_mode,
            saved_at: Utc::now(),
            enumeration: None,
            totals: None,
            pending_deletions: None,
        }
    }
}
