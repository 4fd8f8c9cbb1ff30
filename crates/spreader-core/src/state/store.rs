//! Crash-safe persistence of [`RunState`].
//!
//! Layout next to the configured path (`state.json` here):
//!
//! - `state.json`: primary, always replaced by an atomic rename
//! - `state.json.bak`: the previous primary
//! - `state.json.sha256`: uppercase SHA-256 of the primary, written after the rename
//! - `state.json.pending`: deferred deletions journaled since the last checkpoint
//! - `state.json.corrupt-<timestamp>.json`: quarantined primary, never read again
//! - `state.json.corrupt-<timestamp>.bak.json`: quarantined backup

use super::model::{RunState, STATE_SCHEMA_VERSION};
use crate::diagnostics::RunLog;
use crate::error::Error;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Why a state artifact could not be used.
#[derive(Debug)]
enum Unusable {
    Unreadable(io::Error),
    ChecksumMismatch { expected: String, actual: String },
    Unparsable(serde_json::Error),
    NewerSchema(u32),
}

impl fmt::Display for Unusable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unusable::Unreadable(e) => write!(f, "unreadable: {}", e),
            Unusable::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch (sidecar {}, content {})", expected, actual)
            }
            Unusable::Unparsable(e) => write!(f, "not a valid state record: {}", e),
            Unusable::NewerSchema(v) => write!(
                f,
                "schema version {} is newer than supported version {}",
                v, STATE_SCHEMA_VERSION
            ),
        }
    }
}

/// Where [`StateStore::inspect`] found a usable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    Primary,
    Backup,
    None,
}

/// Read-only view of the on-disk artifacts.
#[derive(Debug, Clone)]
pub struct StateStatus {
    pub primary_exists: bool,
    pub backup_exists: bool,
    pub checksum_exists: bool,
    pub checksum_matches: Option<bool>,
    pub source: StateSource,
    pub state: Option<RunState>,
    pub journal_exists: bool,
    pub quarantined: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Uppercase hex SHA-256 of a file's bytes.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(hex::encode_upper(Sha256::digest(&bytes)))
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".bak")
    }

    pub fn checksum_path(&self) -> PathBuf {
        with_suffix(&self.path, ".sha256")
    }

    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, ".lock")
    }

    pub fn journal_path(&self) -> PathBuf {
        with_suffix(&self.path, ".pending")
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string())
    }

    /// Back up, write to a temp file, rename over the primary, then write the sidecar.
    pub fn save(&self, state: &RunState, log: &RunLog) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let directory = self.directory();
        fs::create_dir_all(&directory)?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                log.warn(format!(
                    "Could not back up state file {}: {}",
                    self.path.display(),
                    e
                ));
            }
        }

        let temp_path = directory.join(format!(".{}.{}.tmp", self.file_name(), Uuid::new_v4()));
        if let Err(e) = write_synced(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        let checksum = match file_checksum(&temp_path) {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
        };

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        sync_directory(&directory);

        // Only now does the primary the sidecar describes exist.
        fs::write(self.checksum_path(), format!("{}\n", checksum))?;

        debug!(
            "Saved checkpoint {} to {}",
            state.checkpoint,
            self.path.display()
        );
        Ok(())
    }

    /// Load the newest usable record, healing from the backup when needed.
    ///
    /// Never fails: anything that goes wrong is logged and reported as "no state".
    pub fn load(&self, log: &RunLog) -> Option<RunState> {
        match self.try_load(log) {
            Ok(state) => state,
            Err(e) => {
                log.error(format!(
                    "State file {} unavailable, starting without it: {}",
                    self.path.display(),
                    e
                ));
                None
            }
        }
    }

    fn try_load(&self, log: &RunLog) -> Result<Option<RunState>, Error> {
        let primary_exists = self.path.exists();
        let backup_path = self.backup_path();
        let backup_exists = backup_path.exists();

        if !primary_exists && !backup_exists {
            return Ok(None);
        }

        if primary_exists {
            match self.read_primary() {
                Ok(state) => {
                    if !self.checksum_path().exists() {
                        debug!("Deriving missing checksum for {}", self.path.display());
                        self.write_checksum_for_primary()?;
                    }
                    return Ok(Some(state));
                }
                Err(reason) => log.warn(format!(
                    "State file {} is unusable: {}",
                    self.path.display(),
                    reason
                )),
            }
        }

        if backup_exists {
            match read_state(&backup_path) {
                Ok(state) => {
                    fs::copy(&backup_path, &self.path)?;
                    self.write_checksum_for_primary()?;
                    log.warn(format!(
                        "Recovered checkpoint {} from backup {}",
                        state.checkpoint,
                        backup_path.display()
                    ));
                    return Ok(Some(state));
                }
                Err(reason) => log.warn(format!(
                    "Backup state file {} is unusable: {}",
                    backup_path.display(),
                    reason
                )),
            }
        }

        self.quarantine(log);
        Ok(None)
    }

    fn read_primary(&self) -> Result<RunState, Unusable> {
        let checksum_path = self.checksum_path();
        if checksum_path.exists() {
            let expected = fs::read_to_string(&checksum_path)
                .map_err(Unusable::Unreadable)?
                .trim()
                .to_string();
            let actual = file_checksum(&self.path).map_err(Unusable::Unreadable)?;
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Unusable::ChecksumMismatch { expected, actual });
            }
        }
        read_state(&self.path)
    }

    fn write_checksum_for_primary(&self) -> io::Result<()> {
        let checksum = file_checksum(&self.path)?;
        fs::write(self.checksum_path(), format!("{}\n", checksum))
    }

    /// Move the corrupt primary (with its sidecar) and the corrupt backup
    /// aside for diagnosis, so the next load starts clean.
    fn quarantine(&self, log: &RunLog) {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let directory = self.directory();
        let name = self.file_name();

        let quarantine_path = directory.join(format!("{}.corrupt-{}.json", name, stamp));
        if self.path.exists() && self.move_aside(&self.path, &quarantine_path, log) {
            let checksum_path = self.checksum_path();
            if checksum_path.exists() {
                let quarantined_checksum = with_suffix(&quarantine_path, ".sha256");
                if let Err(e) = fs::rename(&checksum_path, &quarantined_checksum) {
                    log.warn(format!(
                        "Could not quarantine checksum {}: {}",
                        checksum_path.display(),
                        e
                    ));
                }
            }
        }

        let backup_path = self.backup_path();
        if backup_path.exists() {
            let quarantined_backup =
                directory.join(format!("{}.corrupt-{}.bak.json", name, stamp));
            self.move_aside(&backup_path, &quarantined_backup, log);
        }
    }

    fn move_aside(&self, from: &Path, to: &Path, log: &RunLog) -> bool {
        match fs::rename(from, to) {
            Ok(()) => {
                log.warn(format!(
                    "Quarantined unusable state file {} as {}",
                    from.display(),
                    to.display()
                ));
                true
            }
            Err(e) => {
                log.error(format!(
                    "Could not quarantine state file {}: {}",
                    from.display(),
                    e
                ));
                false
            }
        }
    }

    /// Drop the deferred-deletion journal once its entries are checkpointed.
    pub fn clear_journal(&self, log: &RunLog) {
        let journal = self.journal_path();
        match fs::remove_file(&journal) {
            Ok(()) => debug!("Removed {}", journal.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log.warn(format!("Could not remove {}: {}", journal.display(), e)),
        }
    }

    /// Delete primary, backup, sidecar and journal once a run has finished.
    pub fn remove(&self, log: &RunLog) {
        for path in [
            self.path.clone(),
            self.backup_path(),
            self.checksum_path(),
            self.journal_path(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log.warn(format!("Could not remove {}: {}", path.display(), e)),
            }
        }
        info!("Checkpoint state cleared");
    }

    /// Describe the artifacts without repairing or moving anything.
    pub fn inspect(&self) -> StateStatus {
        let primary_exists = self.path.exists();
        let backup_exists = self.backup_path().exists();
        let checksum_exists = self.checksum_path().exists();

        let checksum_matches = if primary_exists && checksum_exists {
            let expected = fs::read_to_string(self.checksum_path()).ok();
            let actual = file_checksum(&self.path).ok();
            match (expected, actual) {
                (Some(expected), Some(actual)) => Some(expected.trim().eq_ignore_ascii_case(&actual)),
                _ => Some(false),
            }
        } else {
            None
        };

        let (source, state) = match self.read_primary() {
            Ok(state) if primary_exists => (StateSource::Primary, Some(state)),
            _ => match read_state(&self.backup_path()) {
                Ok(state) if backup_exists => (StateSource::Backup, Some(state)),
                _ => (StateSource::None, None),
            },
        };

        StateStatus {
            primary_exists,
            backup_exists,
            checksum_exists,
            checksum_matches,
            source,
            state,
            journal_exists: self.journal_path().exists(),
            quarantined: self.quarantined_files(),
        }
    }

    fn quarantined_files(&self) -> Vec<PathBuf> {
        let prefix = format!("{}.corrupt-", self.file_name());
        let mut found: Vec<PathBuf> = fs::read_dir(self.directory())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.file_name()
                            .map(|n| {
                                let n = n.to_string_lossy();
                                n.starts_with(&prefix) && n.ends_with(".json")
                            })
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        found.sort();
        found
    }
}

fn read_state(path: &Path) -> Result<RunState, Unusable> {
    let bytes = fs::read(path).map_err(Unusable::Unreadable)?;
    let state: RunState = serde_json::from_slice(&bytes).map_err(Unusable::Unparsable)?;
    if state.schema_version > STATE_SCHEMA_VERSION {
        return Err(Unusable::NewerSchema(state.schema_version));
    }
    Ok(state)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sync_directory(directory: &Path) {
    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(directory) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = directory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeleteMode;
    use tempfile::tempdir;

    #[test]
    fn test_artifact_paths() {
        let store = StateStore::new("/var/lib/spreader/state.json");
        assert_eq!(store.backup_path(), Path::new("/var/lib/spreader/state.json.bak"));
        assert_eq!(store.checksum_path(), Path::new("/var/lib/spreader/state.json.sha256"));
        assert_eq!(store.lock_path(), Path::new("/var/lib/spreader/state.json.lock"));
        assert_eq!(store.journal_path(), Path::new("/var/lib/spreader/state.json.pending"));
    }

    #[test]
    fn test_sidecar_is_uppercase_hex_of_primary() {
        let tmp = tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let log = RunLog::new();
        let state = RunState::new("s1".into(), "/in".into(), DeleteMode::Immediate);
        store.save(&state, &log).unwrap();

        let sidecar = fs::read_to_string(store.checksum_path()).unwrap();
        let line = sidecar.trim_end();
        assert_eq!(line.len(), 64);
        assert!(line.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(line, file_checksum(store.path()).unwrap());
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let log = RunLog::new();
        let state = RunState::new("s1".into(), "/in".into(), DeleteMode::Immediate);
        store.save(&state, &log).unwrap();
        store.save(&state, &log).unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(store.backup_path().exists());
    }
}
