//! Counted log sink.
//!
//! Every warning and error raised while distributing files goes through a
//! [`RunLog`], which forwards it to `tracing` and keeps a tally. The tally is
//! what gets checkpointed and what the deferred-deletion gate looks at, so a
//! component that logs with `tracing::warn!` directly is invisible to both.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Snapshot of the warning/error tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCounts {
    pub warnings: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct RunLog {
    warnings: AtomicU64,
    errors: AtomicU64,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&self, message: impl Display) {
        warn!("{}", message);
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self, message: impl Display) {
        error!("{}", message);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add counts carried over from an earlier, interrupted invocation.
    pub fn absorb(&self, counts: LogCounts) {
        self.warnings.fetch_add(counts.warnings, Ordering::Relaxed);
        self.errors.fetch_add(counts.errors, Ordering::Relaxed);
    }

    pub fn counts(&self) -> LogCounts {
        LogCounts {
            warnings: self.warnings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
