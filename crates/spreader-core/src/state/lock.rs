use crate::config::RetryPolicy;
use crate::diagnostics::RunLog;
use crate::error::Error;
use crate::retry;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock keeping two runs off the same state file.
///
/// Dropping the lock closes the handle, which releases it as well; `release`
/// just makes the hand-off explicit at the call site.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Open (creating if needed) and exclusively lock `path`, retrying with
    /// backoff while another process holds it.
    pub fn acquire(path: &Path, policy: &RetryPolicy, log: &RunLog) -> Result<StateLock, Error> {
        let description = format!("lock {}", path.display());
        let file = retry::execute(policy, log, &description, || {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;
            // Trait call spelled out: newer std has an inherent File::try_lock_exclusive.
            FileExt::try_lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .map_err(|source| Error::LockUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Acquired state lock {}", path.display());
        Ok(StateLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn release(self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed, closing anyway: {}", self.path.display(), e);
        }
        debug!("Released state lock {}", self.path.display());
    }
}
