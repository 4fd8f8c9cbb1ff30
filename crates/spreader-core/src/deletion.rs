//! Deferred deletion of source files.
//!
//! Under [`DeleteMode::Deferred`](crate::config::DeleteMode::Deferred) a source
//! file is queued instead of removed once its copy is verified. The queue is
//! checkpointed with the run and drained at the very end, provided the run's
//! aggregated warning/error counts satisfy the configured [`DeletionGate`].

use crate::config::{DeletionGate, RetryPolicy};
use crate::diagnostics::{LogCounts, RunLog};
use crate::retry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A source file waiting to be deleted, with the metadata it had when queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub session_id: String,
}

impl PendingDeletion {
    /// Stat `path` now and tag it with the owning session.
    pub fn capture(path: &Path, session_id: &str) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(PendingDeletion {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
            queued_at: Utc::now(),
            session_id: session_id.to_string(),
        })
    }
}

/// Outcome of [`DeletionQueue::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub gate_passed: bool,
    pub deleted: usize,
    pub failed: usize,
    /// Size or modification time differed from what was captured.
    pub changed: usize,
    pub missing: usize,
    /// Queued by another session; never touched.
    pub foreign: usize,
}

pub fn gate_allows(gate: DeletionGate, counts: LogCounts) -> bool {
    match gate {
        DeletionGate::NoWarningsOrErrors => counts.warnings == 0 && counts.errors == 0,
        DeletionGate::NoErrors => counts.errors == 0,
    }
}

/// Append-only record of queue entries added since the last checkpoint.
///
/// One JSON object per line, synced after every append, so a crash between
/// checkpoints cannot lose an entry whose copy already landed in the target.
#[derive(Debug)]
pub struct QueueJournal {
    file: File,
}

impl QueueJournal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, entry: &PendingDeletion) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(io::Error::other)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()
    }

    /// Entries journaled by `session_id`. A missing journal is empty; a torn or
    /// unparsable line is skipped with a warning.
    pub fn read(path: &Path, session_id: &str, log: &RunLog) -> Vec<PendingDeletion> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log.warn(format!(
                    "Cannot read deletion journal {}: {}",
                    path.display(),
                    e
                ));
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log.warn(format!(
                        "Deletion journal {} unreadable after line {}: {}",
                        path.display(),
                        index,
                        e
                    ));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PendingDeletion>(&line) {
                Ok(entry) if entry.session_id == session_id => entries.push(entry),
                Ok(entry) => debug!(
                    "Ignoring journal entry for {} from session {}",
                    entry.path.display(),
                    entry.session_id
                ),
                Err(e) => log.warn(format!(
                    "Skipping malformed line {} in deletion journal {}: {}",
                    index + 1,
                    path.display(),
                    e
                )),
            }
        }
        entries
    }
}

#[derive(Debug, Default)]
pub struct DeletionQueue {
    entries: Vec<PendingDeletion>,
    journal: Option<QueueJournal>,
}

impl PartialEq for DeletionQueue {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for DeletionQueue {}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<PendingDeletion>) -> Self {
        Self {
            entries,
            journal: None,
        }
    }

    /// Every later [`enqueue`](Self::enqueue) is written through to `journal`.
    pub fn attach_journal(&mut self, journal: QueueJournal) {
        self.journal = Some(journal);
    }

    pub fn detach_journal(&mut self) -> Option<QueueJournal> {
        self.journal.take()
    }

    pub fn contains(&self, path: &Path, session_id: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.session_id == session_id && entry.path == path)
    }

    pub fn entries(&self) -> &[PendingDeletion] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enqueue(&mut self, path: &Path, session_id: &str) -> io::Result<()> {
        let entry = PendingDeletion::capture(path, session_id)?;
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&entry)?;
        }
        debug!("Queued {} for deferred deletion", path.display());
        self.entries.push(entry);
        Ok(())
    }

    /// Delete every entry owned by `current_session` that is unchanged since it
    /// was queued, if `counts` satisfy `gate`.
    ///
    /// When the gate fails nothing is deleted and the queue is kept. Otherwise
    /// the queue is emptied whatever the per-entry outcome; failures are logged,
    /// not retried later.
    pub fn drain(
        &mut self,
        current_session: &str,
        counts: LogCounts,
        gate: DeletionGate,
        policy: &RetryPolicy,
        log: &RunLog,
    ) -> DrainReport {
        let mut report = DrainReport::default();

        if !gate_allows(gate, counts) {
            log.warn(format!(
                "Deferred deletion skipped: condition '{}' not met ({} warnings, {} errors); \
                 {} source file(s) left in place",
                gate,
                counts.warnings,
                counts.errors,
                self.entries.len()
            ));
            return report;
        }
        report.gate_passed = true;

        for entry in self.entries.drain(..) {
            if entry.session_id != current_session {
                log.warn(format!(
                    "Not deleting {}: queued by session {}, current session is {}",
                    entry.path.display(),
                    entry.session_id,
                    current_session
                ));
                report.foreign += 1;
                continue;
            }

            let metadata = match fs::metadata(&entry.path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log.warn(format!(
                        "Not deleting {}: cannot stat it any more: {}",
                        entry.path.display(),
                        e
                    ));
                    report.missing += 1;
                    continue;
                }
            };

            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            if metadata.len() != entry.size || modified != Some(entry.modified) {
                log.warn(format!(
                    "Not deleting {}: changed since it was queued (size {} -> {}, modified {} -> {})",
                    entry.path.display(),
                    entry.size,
                    metadata.len(),
                    entry.modified,
                    modified
                        .map(|m| m.to_rfc3339())
                        .unwrap_or_else(|| "unknown".to_string())
                ));
                report.changed += 1;
                continue;
            }

            let description = format!("delete {}", entry.path.display());
            match retry::execute(policy, log, &description, || fs::remove_file(&entry.path)) {
                Ok(()) => {
                    debug!("deleted: {}", entry.path.display());
                    report.deleted += 1;
                }
                // Already logged as an error by the retry loop.
                Err(_) => report.failed += 1,
            }
        }

        info!(
            "Deferred deletion finished: {} deleted, {} failed, {} changed, {} missing, {} foreign",
            report.deleted, report.failed, report.changed, report.missing, report.foreign
        );
        report
    }
}
