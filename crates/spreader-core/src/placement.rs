//! Least-filled, randomized placement of files into capped subfolders.

use crate::config::{DeleteMode, RetryPolicy};
use crate::deletion::DeletionQueue;
use crate::diagnostics::RunLog;
use crate::error::Error;
use crate::naming::{self, NameGenerator};
use crate::platform::{self, Trash};
use crate::progress::ProgressReporter;
use crate::retry;
use crate::scanner;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Attempts at finding an unused name before giving up on a file.
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Copy out of the source tree, then apply the deletion policy.
    Copy,
    /// Rename within the target tree.
    Move,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementReport {
    pub placed: usize,
    pub failed: usize,
    /// Gone before their turn came, e.g. handled before an interruption.
    pub skipped: usize,
    /// Files placed while every subfolder was already at the cap.
    pub fallbacks: usize,
}

impl AddAssign for PlacementReport {
    fn add_assign(&mut self, other: Self) {
        self.placed += other.placed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.fallbacks += other.fallbacks;
    }
}

/// Everything the placement step needs, borrowed from the orchestrator.
pub struct PlacementEngine<'a> {
    pub target_root: &'a Path,
    pub files_per_folder: usize,
    pub delete_mode: DeleteMode,
    pub session_id: &'a str,
    pub retry: &'a RetryPolicy,
    pub names: &'a dyn NameGenerator,
    pub trash: &'a dyn Trash,
    pub log: &'a RunLog,
}

/// Pick the destination index for the next file.
///
/// Eligible folders are those under `limit`; if there are none, every folder
/// is eligible (the second value is then `true`). Among eligible folders the
/// least-filled wins, ties broken uniformly at random.
pub fn choose_destination<R: Rng + ?Sized>(
    counts: &[usize],
    limit: usize,
    rng: &mut R,
) -> Option<(usize, bool)> {
    if counts.is_empty() {
        return None;
    }
    let mut eligible: Vec<usize> = (0..counts.len()).filter(|&i| counts[i] < limit).collect();
    let fallback = eligible.is_empty();
    if fallback {
        eligible = (0..counts.len()).collect();
    }
    let min = eligible.iter().map(|&i| counts[i]).min()?;
    let tied: Vec<usize> = eligible.into_iter().filter(|&i| counts[i] == min).collect();
    tied.choose(rng).map(|&i| (i, fallback))
}

impl<'a> PlacementEngine<'a> {
    /// Normalize and dedupe candidate subfolders. Candidates that cannot be used
    /// as-is collapse onto the target root.
    pub fn normalize_subfolders(&self, subfolders: &[PathBuf]) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = Vec::with_capacity(subfolders.len());
        for candidate in subfolders {
            let normalized = platform::normalize_subfolder(candidate, self.target_root);
            if normalized.as_path() != candidate.as_path() {
                self.log.warn(format!(
                    "Subfolder '{}' is not an absolute path; using target root {} instead",
                    candidate.display(),
                    self.target_root.display()
                ));
            }
            if !folders.contains(&normalized) {
                folders.push(normalized);
            }
        }
        folders
    }

    /// Place each of `files` into one of `subfolders`.
    ///
    /// Per-file failures are logged and counted; only an unusable subfolder
    /// list is an error.
    pub fn distribute(
        &self,
        files: &[PathBuf],
        subfolders: &[PathBuf],
        mode: TransferMode,
        queue: &mut DeletionQueue,
        reporter: &dyn ProgressReporter,
    ) -> Result<PlacementReport, Error> {
        let mut report = PlacementReport::default();
        if files.is_empty() {
            return Ok(report);
        }

        let (folders, mut counts) = self.seed_counts(&self.normalize_subfolders(subfolders));
        if folders.is_empty() {
            return Err(Error::NoSubfolders(self.target_root.to_path_buf()));
        }
        let real: Vec<usize> = (0..folders.len())
            .filter(|&i| folders[i].as_path() != self.target_root)
            .collect();

        let mut rng = rand::thread_rng();
        let mut order: Vec<&PathBuf> = files.iter().collect();
        order.shuffle(&mut rng);

        let total = order.len();
        for (done, file) in order.into_iter().enumerate() {
            if !file.exists() {
                info!("Skipping {}: no longer present", file.display());
                report.skipped += 1;
                reporter.on_file_placed(done + 1, total);
                continue;
            }

            let Some((mut index, fallback)) =
                choose_destination(&counts, self.files_per_folder, &mut rng)
            else {
                return Err(Error::NoSubfolders(self.target_root.to_path_buf()));
            };
            if fallback {
                self.log.warn(format!(
                    "Every subfolder holds {} or more files; placing {} in the least-filled one",
                    self.files_per_folder,
                    file.display()
                ));
                report.fallbacks += 1;
            }

            if folders[index].as_path() == self.target_root && !real.is_empty() {
                let real_counts: Vec<usize> = real.iter().map(|&i| counts[i]).collect();
                if let Some((pick, _)) =
                    choose_destination(&real_counts, self.files_per_folder, &mut rng)
                {
                    debug!(
                        "Refusing target root for {}; forcing subfolder {}",
                        file.display(),
                        folders[real[pick]].display()
                    );
                    index = real[pick];
                }
            }

            if self.place_file(file, &folders[index], mode, queue) {
                counts[index] += 1;
                report.placed += 1;
            } else {
                report.failed += 1;
            }
            reporter.on_file_placed(done + 1, total);
        }

        debug!(
            "Placement batch done: {} placed, {} failed, {} skipped, {} over cap",
            report.placed, report.failed, report.skipped, report.fallbacks
        );
        Ok(report)
    }

    /// Reconcile per-folder counts from disk. Folders that vanished are
    /// recreated; folders that cannot be read are dropped from the batch.
    fn seed_counts(&self, folders: &[PathBuf]) -> (Vec<PathBuf>, Vec<usize>) {
        let mut usable = Vec::with_capacity(folders.len());
        let mut counts = Vec::with_capacity(folders.len());
        for folder in folders {
            match scanner::count_files(folder) {
                Ok(count) => {
                    usable.push(folder.clone());
                    counts.push(count);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let description = format!("create subfolder {}", folder.display());
                    if retry::execute(self.retry, self.log, &description, || {
                        fs::create_dir_all(folder)
                    })
                    .is_ok()
                    {
                        usable.push(folder.clone());
                        counts.push(0);
                    }
                }
                Err(e) => self.log.warn(format!(
                    "Cannot count files in {}, leaving it out: {}",
                    folder.display(),
                    e
                )),
            }
        }
        (usable, counts)
    }

    /// Transfer one file and apply the deletion policy. `true` when the file
    /// verifiably arrived.
    fn place_file(
        &self,
        file: &Path,
        folder: &Path,
        mode: TransferMode,
        queue: &mut DeletionQueue,
    ) -> bool {
        let destination = match self.unique_destination(folder, file) {
            Ok(destination) => destination,
            Err(e) => {
                self.log.error(format!("No destination for {}: {}", file.display(), e));
                return false;
            }
        };

        let source_len = match fs::metadata(file) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                self.log.error(format!("Cannot stat {}: {}", file.display(), e));
                return false;
            }
        };

        let transferred = match mode {
            TransferMode::Copy => {
                let description = format!("copy {} to {}", file.display(), destination.display());
                retry::execute(self.retry, self.log, &description, || {
                    fs::copy(file, &destination).map(|_| ())
                })
            }
            TransferMode::Move => {
                let description = format!("move {} to {}", file.display(), destination.display());
                retry::execute(self.retry, self.log, &description, || {
                    fs::rename(file, &destination)
                })
            }
        };
        if transferred.is_err() {
            return false;
        }

        let verified = match mode {
            TransferMode::Copy => fs::metadata(&destination)
                .map(|m| m.len() == source_len)
                .unwrap_or(false),
            TransferMode::Move => destination.exists() && !file.exists(),
        };
        if !verified {
            self.log.error(format!(
                "Could not verify {} at {}; leaving the original untouched",
                file.display(),
                destination.display()
            ));
            if mode == TransferMode::Copy && file.exists() {
                let _ = fs::remove_file(&destination);
            }
            return false;
        }

        debug!("{} -> {}", file.display(), destination.display());
        if mode == TransferMode::Copy {
            self.apply_delete_mode(file, queue);
        }
        true
    }

    fn apply_delete_mode(&self, file: &Path, queue: &mut DeletionQueue) {
        match self.delete_mode {
            DeleteMode::RecycleBin => {
                if let Err(e) = self.trash.move_to_trash(file) {
                    self.log.warn(format!(
                        "Could not move {} to the recycle bin: {}",
                        file.display(),
                        e
                    ));
                }
            }
            DeleteMode::Immediate => {
                let description = format!("delete {}", file.display());
                // A failure is already logged as an error by the retry loop.
                let _ = retry::execute(self.retry, self.log, &description, || fs::remove_file(file));
            }
            DeleteMode::Deferred => {
                if let Err(e) = queue.enqueue(file, self.session_id) {
                    self.log.warn(format!(
                        "Could not queue {} for deferred deletion: {}",
                        file.display(),
                        e
                    ));
                }
            }
        }
    }

    fn unique_destination(&self, folder: &Path, original: &Path) -> Result<PathBuf, Error> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = naming::file_name_with_extension(&self.names.generate(), original);
            let candidate = folder.join(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
            debug!("Name collision at {}, generating another", candidate.display());
        }
        Err(Error::Other(format!(
            "no free name in {} after {} attempts",
            folder.display(),
            MAX_NAME_ATTEMPTS
        )))
    }

    /// Create one new, uniquely named subfolder under the target root.
    pub fn create_subfolder(&self) -> Result<PathBuf, Error> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.target_root.join(self.names.generate());
            if candidate.exists() {
                continue;
            }
            let description = format!("create subfolder {}", candidate.display());
            retry::execute(self.retry, self.log, &description, || fs::create_dir(&candidate))?;
            info!("Created subfolder {}", candidate.display());
            return Ok(candidate);
        }
        Err(Error::Other(format!(
            "no free subfolder name in {} after {} attempts",
            self.target_root.display(),
            MAX_NAME_ATTEMPTS
        )))
    }

    /// Grow `subfolders` until their free slots can hold `incoming` more files.
    /// Returns how many subfolders were created.
    pub fn ensure_capacity(&self, subfolders: &mut Vec<PathBuf>, incoming: usize) -> usize {
        let normalized = self.normalize_subfolders(subfolders);
        let mut free: usize = normalized
            .iter()
            .filter(|folder| folder.as_path() != self.target_root)
            .map(|folder| {
                let count = scanner::count_files(folder).unwrap_or(0);
                self.files_per_folder.saturating_sub(count)
            })
            .sum();

        let mut created = 0;
        while free < incoming {
            match self.create_subfolder() {
                Ok(folder) => {
                    subfolders.push(folder);
                    free += self.files_per_folder;
                    created += 1;
                }
                Err(e) => {
                    self.log.warn(format!(
                        "Could not add a subfolder ({}); {} file(s) may exceed the cap of {}",
                        e,
                        incoming - free,
                        self.files_per_folder
                    ));
                    break;
                }
            }
        }
        created
    }
}
