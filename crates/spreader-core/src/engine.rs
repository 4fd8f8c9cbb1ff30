use crate::config::{paths_overlap, DeleteMode, RunConfig};
use crate::deletion::{DeletionQueue, DrainReport, QueueJournal};
use crate::diagnostics::{LogCounts, RunLog};
use crate::error::Error;
use crate::naming::{NameGenerator, RandomNameGenerator};
use crate::placement::{PlacementEngine, PlacementReport, TransferMode};
use crate::platform::{SystemTrash, Trash};
use crate::progress::ProgressReporter;
use crate::retry;
use crate::scanner;
use crate::state::{Checkpoint, EnumerationPayload, FileTotals, RunState, StateLock, StateStore};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Checkpointed pipeline moving every file under the source folder into
/// capped subfolders of the target folder.
pub struct DistributionEngine {
    config: RunConfig,
    names: Box<dyn NameGenerator>,
    trash: Box<dyn Trash>,
    stop_after: Option<Checkpoint>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: String,
    pub resumed_from: Checkpoint,
    pub reached: Checkpoint,
    /// `false` when the run stopped early at a requested checkpoint.
    pub completed: bool,
    pub placement: PlacementReport,
    pub subfolders_created: usize,
    pub drain: Option<DrainReport>,
    pub counts: LogCounts,
    /// `None` when the check did not run (early stop or no recorded totals).
    pub final_count_matches: Option<bool>,
    pub duration: Duration,
}

/// Mutable state owned by one invocation and handed to each phase.
struct RunContext<'a> {
    log: RunLog,
    store: StateStore,
    lock: Option<StateLock>,
    state: RunState,
    session_id: String,
    queue: DeletionQueue,
    source: PathBuf,
    target: PathBuf,
    placement: PlacementReport,
    subfolders_created: usize,
    reporter: &'a dyn ProgressReporter,
}

impl DistributionEngine {
    pub fn new(config: RunConfig) -> Self {
        let names = RandomNameGenerator::new(config.name_length);
        Self {
            config,
            names: Box::new(names),
            trash: Box::new(SystemTrash),
            stop_after: None,
        }
    }

    pub fn with_name_generator(mut self, names: impl NameGenerator + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    pub fn with_trash(mut self, trash: impl Trash + 'static) -> Self {
        self.trash = Box::new(trash);
        self
    }

    /// Persist `checkpoint` and return instead of continuing.
    pub fn stop_after(mut self, checkpoint: Checkpoint) -> Self {
        self.stop_after = Some(checkpoint);
        self
    }

    /// Run (or, with `restart`, resume) the pipeline:
    /// 1. Validate inputs
    /// 2. Enumerate source files and target subfolders, pre-create subfolders
    /// 3. Copy source files into the least-filled subfolders
    /// 4. Rebalance stray root files and overfull subfolders
    /// 5. Drain deferred deletions, check counts, clear the checkpoint
    pub fn run(&self, restart: bool, reporter: &dyn ProgressReporter) -> Result<RunSummary, Error> {
        let started = Instant::now();
        let log = RunLog::new();
        let store = StateStore::new(&self.config.state_file);

        let state_dir = state_directory(store.path())?;
        let lock = StateLock::acquire(&store.lock_path(), &self.config.retry, &log)?;

        let source = absolute(&self.config.source_folder)?;
        let loaded = if restart {
            lock.release();
            let loaded = store.load(&log);
            if loaded.is_none() {
                log.warn(format!(
                    "No checkpoint found at {}, executing from the top",
                    store.path().display()
                ));
            }
            loaded
        } else {
            if store.path().exists() || store.backup_path().exists() {
                log.warn(format!(
                    "Ignoring existing checkpoint at {}; starting a fresh run",
                    store.path().display()
                ));
            }
            lock.release();
            None
        };
        let lock = StateLock::acquire(&store.lock_path(), &self.config.retry, &log)?;

        let (state, session_id, queue) = match loaded {
            Some(state) => self.restore(state, &source, &store, &log)?,
            None => {
                let session_id = Uuid::new_v4().to_string();
                let state = RunState::new(session_id.clone(), source.clone(), self.config.delete_mode);
                (state, session_id, DeletionQueue::new())
            }
        };
        let resumed_from = state.checkpoint;
        if resumed_from > Checkpoint::Fresh {
            info!(
                "Resuming session {} from checkpoint {}",
                session_id, resumed_from
            );
        } else {
            info!("Starting session {}", session_id);
        }

        let mut ctx = RunContext {
            log,
            store,
            lock: Some(lock),
            state,
            session_id,
            queue,
            source,
            target: absolute(&self.config.target_folder)?,
            placement: PlacementReport::default(),
            subfolders_created: 0,
            reporter,
        };

        if ctx.state.checkpoint < Checkpoint::Prepared {
            let phase_start = Instant::now();
            reporter.on_phase_start(Checkpoint::Prepared, 0);
            self.prepare(&mut ctx, &state_dir)?;
            if self.commit(&mut ctx, Checkpoint::Prepared, phase_start)? {
                return Ok(self.summarize(ctx, resumed_from, false, None, None, started));
            }
        } else {
            self.reopen_target(&mut ctx)?;
        }

        if ctx.state.checkpoint < Checkpoint::Enumerated {
            let phase_start = Instant::now();
            reporter.on_phase_start(Checkpoint::Enumerated, 0);
            self.enumerate(&mut ctx)?;
            if self.commit(&mut ctx, Checkpoint::Enumerated, phase_start)? {
                return Ok(self.summarize(ctx, resumed_from, false, None, None, started));
            }
        }

        if ctx.state.checkpoint < Checkpoint::Distributed {
            let phase_start = Instant::now();
            self.distribute_sources(&mut ctx)?;
            if self.commit(&mut ctx, Checkpoint::Distributed, phase_start)? {
                return Ok(self.summarize(ctx, resumed_from, false, None, None, started));
            }
        }

        if ctx.state.checkpoint < Checkpoint::Redistributed {
            let phase_start = Instant::now();
            self.redistribute(&mut ctx)?;
            if self.commit(&mut ctx, Checkpoint::Redistributed, phase_start)? {
                return Ok(self.summarize(ctx, resumed_from, false, None, None, started));
            }
        }

        let (drain, final_count_matches) = self.finish(&mut ctx);
        Ok(self.summarize(ctx, resumed_from, true, drain, final_count_matches, started))
    }

    /// Check a loaded checkpoint against this run's arguments and rebuild the
    /// in-memory pieces it carries.
    fn restore(
        &self,
        mut state: RunState,
        source: &Path,
        store: &StateStore,
        log: &RunLog,
    ) -> Result<(RunState, String, DeletionQueue), Error> {
        if state.source_folder.as_path() != source {
            return Err(Error::RestartMismatch {
                field: "source folder",
                persisted: state.source_folder.display().to_string(),
                requested: source.display().to_string(),
            });
        }
        if state.delete_mode != self.config.delete_mode {
            return Err(Error::RestartMismatch {
                field: "delete mode",
                persisted: state.delete_mode.to_string(),
                requested: self.config.delete_mode.to_string(),
            });
        }

        let session_id = match state.session_id.clone() {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                log.warn(format!(
                    "Checkpoint carries no session id; continuing as new session {}",
                    id
                ));
                state.session_id = Some(id.clone());
                id
            }
        };

        log.absorb(LogCounts {
            warnings: state.warnings_so_far,
            errors: state.errors_so_far,
        });

        if state.checkpoint == Checkpoint::Enumerated && state.enumeration.is_none() {
            log.warn("Checkpoint 2 has no enumeration payload; enumerating again");
            state.checkpoint = Checkpoint::Prepared;
        }

        let queue = if state.checkpoint >= Checkpoint::Distributed {
            DeletionQueue::from_entries(state.pending_deletions.clone().unwrap_or_default())
        } else if state.checkpoint == Checkpoint::Enumerated
            && self.config.delete_mode == DeleteMode::Deferred
        {
            // Copies made before an interruption in phase 3 still own their sources.
            let entries = QueueJournal::read(&store.journal_path(), &session_id, log);
            if !entries.is_empty() {
                info!(
                    "Recovered {} deferred deletion(s) from an interrupted distribution",
                    entries.len()
                );
            }
            DeletionQueue::from_entries(entries)
        } else {
            DeletionQueue::new()
        };

        Ok((state, session_id, queue))
    }

    /// 0 -> 1: validate inputs and record the immutable run parameters.
    fn prepare(&self, ctx: &mut RunContext<'_>, state_dir: &Path) -> Result<(), Error> {
        if self.config.files_per_folder == 0 {
            return Err(Error::InvalidArgument(
                "files per folder must be at least 1".to_string(),
            ));
        }
        if !ctx.source.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "source folder {} does not exist or is not a directory",
                ctx.source.display()
            )));
        }

        let description = format!("create target folder {}", ctx.target.display());
        retry::execute(&self.config.retry, &ctx.log, &description, || {
            fs::create_dir_all(&ctx.target)
        })
        .map_err(|e| {
            Error::InvalidArgument(format!(
                "target folder {} cannot be created: {}",
                ctx.target.display(),
                e
            ))
        })?;
        ctx.target = fs::canonicalize(&ctx.target)?;

        if paths_overlap(&ctx.source, &ctx.target) {
            return Err(Error::InvalidArgument(format!(
                "source {} and target {} must not contain each other",
                ctx.source.display(),
                ctx.target.display()
            )));
        }
        if state_dir.starts_with(&ctx.source) || state_dir.starts_with(&ctx.target) {
            return Err(Error::InvalidArgument(format!(
                "state file directory {} must be outside both source and target",
                state_dir.display()
            )));
        }

        ctx.state.source_folder = ctx.source.clone();
        ctx.state.delete_mode = self.config.delete_mode;
        info!(
            "Distributing {} -> {} ({} files per folder, delete mode {})",
            ctx.source.display(),
            ctx.target.display(),
            self.config.files_per_folder,
            self.config.delete_mode
        );
        Ok(())
    }

    /// Resume path: the target was validated by an earlier invocation.
    fn reopen_target(&self, ctx: &mut RunContext<'_>) -> Result<(), Error> {
        let description = format!("create target folder {}", ctx.target.display());
        retry::execute(&self.config.retry, &ctx.log, &description, || {
            fs::create_dir_all(&ctx.target)
        })?;
        ctx.target = fs::canonicalize(&ctx.target)?;
        Ok(())
    }

    /// 1 -> 2: list source files and target subfolders, pre-create subfolders.
    fn enumerate(&self, ctx: &mut RunContext<'_>) -> Result<(), Error> {
        ctx.store.clear_journal(&ctx.log);
        let source_files =
            scanner::list_source_files(&ctx.source, &self.config.ignore_patterns, &ctx.log)?;
        let mut subfolders = scanner::list_subfolders(&ctx.target)?;
        let target_files_before = scanner::count_files_recursive(&ctx.target);

        let total = source_files.len() + target_files_before;
        let required = total.div_ceil(self.config.files_per_folder);
        info!(
            "Found {} source files, {} files already in target, {} subfolders ({} needed)",
            source_files.len(),
            target_files_before,
            subfolders.len(),
            required
        );

        let placement = self.placement(ctx);
        let mut created = 0;
        while subfolders.len() < required {
            subfolders.push(placement.create_subfolder()?);
            created += 1;
        }
        ctx.subfolders_created += created;

        ctx.state.totals = Some(FileTotals {
            source_files: source_files.len(),
            target_files_before,
        });
        ctx.state.enumeration = Some(EnumerationPayload {
            source_files,
            subfolders,
        });
        Ok(())
    }

    /// 2 -> 3: copy every enumerated source file into the subfolders.
    fn distribute_sources(&self, ctx: &mut RunContext<'_>) -> Result<(), Error> {
        let EnumerationPayload {
            source_files,
            mut subfolders,
        } = ctx
            .state
            .enumeration
            .clone()
            .ok_or_else(|| Error::Other("checkpoint 2 reached without enumeration".to_string()))?;
        ctx.reporter
            .on_phase_start(Checkpoint::Distributed, source_files.len());

        let mut queue = std::mem::take(&mut ctx.queue);
        let (remaining, already_copied): (Vec<PathBuf>, Vec<PathBuf>) = source_files
            .iter()
            .cloned()
            .partition(|file| !queue.contains(file, &ctx.session_id));
        if !already_copied.is_empty() {
            info!(
                "{} source file(s) were copied before the interruption, not copying again",
                already_copied.len()
            );
        }

        if self.config.delete_mode == DeleteMode::Deferred {
            match QueueJournal::open(&ctx.store.journal_path()) {
                Ok(journal) => queue.attach_journal(journal),
                Err(e) => ctx.log.warn(format!(
                    "Cannot open deletion journal {}: {}; an interruption before checkpoint 3 may copy files twice",
                    ctx.store.journal_path().display(),
                    e
                )),
            }
        }

        let placement = self.placement(ctx);
        let created = placement.ensure_capacity(&mut subfolders, remaining.len());
        let report = placement.distribute(
            &remaining,
            &subfolders,
            TransferMode::Copy,
            &mut queue,
            ctx.reporter,
        );
        queue.detach_journal();
        ctx.queue = queue;
        let mut report = report?;
        report.skipped += already_copied.len();

        info!(
            "Distributed {} of {} source files ({} failed, {} skipped)",
            report.placed,
            source_files.len(),
            report.failed,
            report.skipped
        );
        ctx.subfolders_created += created;
        ctx.placement += report;
        ctx.state.enumeration = None;
        Ok(())
    }

    /// 3 -> 4: move files sitting in the target root, then the excess of any
    /// subfolder above the cap, into other subfolders.
    fn redistribute(&self, ctx: &mut RunContext<'_>) -> Result<(), Error> {
        let limit = self.config.files_per_folder;
        let mut subfolders = scanner::list_subfolders(&ctx.target)?;
        let root_files = scanner::list_files(&ctx.target)?;
        ctx.reporter
            .on_phase_start(Checkpoint::Redistributed, root_files.len());

        let mut queue = DeletionQueue::new();
        let mut report = PlacementReport::default();
        let mut created = 0;
        {
            let placement = self.placement(ctx);

            if !root_files.is_empty() {
                info!(
                    "Moving {} file(s) from the target root into subfolders",
                    root_files.len()
                );
                created += placement.ensure_capacity(&mut subfolders, root_files.len());
                report += placement.distribute(
                    &root_files,
                    &subfolders,
                    TransferMode::Move,
                    &mut queue,
                    ctx.reporter,
                )?;
            }

            let mut rng = rand::thread_rng();
            for folder in subfolders.clone() {
                let mut files = match scanner::list_files(&folder) {
                    Ok(files) => files,
                    Err(e) => {
                        ctx.log.warn(format!(
                            "Cannot list {} while checking the cap: {}",
                            folder.display(),
                            e
                        ));
                        continue;
                    }
                };
                if files.len() <= limit {
                    continue;
                }

                let excess = files.len() - limit;
                info!(
                    "{} holds {} files, moving {} elsewhere",
                    folder.display(),
                    files.len(),
                    excess
                );
                files.shuffle(&mut rng);
                files.truncate(excess);

                let mut others: Vec<PathBuf> =
                    subfolders.iter().filter(|f| **f != folder).cloned().collect();
                let before = others.len();
                created += placement.ensure_capacity(&mut others, excess);
                subfolders.extend(others.iter().skip(before).cloned());

                report += placement.distribute(
                    &files,
                    &others,
                    TransferMode::Move,
                    &mut queue,
                    ctx.reporter,
                )?;
            }
        }

        debug!(
            "Redistribution: {} moved, {} failed, {} subfolders created",
            report.placed, report.failed, created
        );
        ctx.subfolders_created += created;
        ctx.placement += report;
        Ok(())
    }

    /// 4 -> done: drain deferred deletions, check counts, clear the checkpoint.
    fn finish(&self, ctx: &mut RunContext<'_>) -> (Option<DrainReport>, Option<bool>) {
        let drain = if self.config.delete_mode == DeleteMode::Deferred {
            let counts = ctx.log.counts();
            let report = ctx.queue.drain(
                &ctx.session_id,
                counts,
                self.config.deletion_gate,
                &self.config.retry,
                &ctx.log,
            );
            ctx.reporter.on_drain_complete(&report);
            Some(report)
        } else {
            None
        };

        let final_count_matches = ctx.state.totals.map(|totals| {
            let actual = scanner::count_files_recursive(&ctx.target);
            let expected = totals.expected_after();
            if actual != expected {
                ctx.log.warn(format!(
                    "File count mismatch: expected {} in target ({} source + {} already there), found {}",
                    expected, totals.source_files, totals.target_files_before, actual
                ));
                false
            } else {
                info!("Target holds the expected {} files", actual);
                true
            }
        });

        if let Some(lock) = ctx.lock.take() {
            lock.release();
        }
        ctx.store.remove(&ctx.log);
        (drain, final_count_matches)
    }

    /// Record `checkpoint` and persist it with the lock briefly released.
    /// Returns `true` when the caller asked to stop here.
    fn commit(
        &self,
        ctx: &mut RunContext<'_>,
        checkpoint: Checkpoint,
        phase_start: Instant,
    ) -> Result<bool, Error> {
        ctx.state.checkpoint = checkpoint;
        ctx.state.session_id = Some(ctx.session_id.clone());
        if checkpoint >= Checkpoint::Distributed && self.config.delete_mode == DeleteMode::Deferred
        {
            ctx.state.pending_deletions = Some(ctx.queue.entries().to_vec());
        }
        let counts = ctx.log.counts();
        ctx.state.warnings_so_far = counts.warnings;
        ctx.state.errors_so_far = counts.errors;
        ctx.state.saved_at = Utc::now();

        if let Some(lock) = ctx.lock.take() {
            lock.release();
        }
        match ctx.store.save(&ctx.state, &ctx.log) {
            Ok(()) if checkpoint == Checkpoint::Distributed => ctx.store.clear_journal(&ctx.log),
            Ok(()) => {}
            Err(e) => ctx.log.error(format!(
                "Could not persist checkpoint {}: {}",
                checkpoint, e
            )),
        }
        ctx.lock = Some(StateLock::acquire(
            &ctx.store.lock_path(),
            &self.config.retry,
            &ctx.log,
        )?);

        let elapsed = phase_start.elapsed();
        info!(
            "Checkpoint {} reached in {:.2}s",
            checkpoint,
            elapsed.as_secs_f64()
        );
        ctx.reporter
            .on_phase_complete(checkpoint, elapsed.as_secs_f64());

        Ok(self.stop_after == Some(checkpoint))
    }

    fn placement<'c>(&'c self, ctx: &'c RunContext<'_>) -> PlacementEngine<'c> {
        PlacementEngine {
            target_root: &ctx.target,
            files_per_folder: self.config.files_per_folder,
            delete_mode: self.config.delete_mode,
            session_id: &ctx.session_id,
            retry: &self.config.retry,
            names: self.names.as_ref(),
            trash: self.trash.as_ref(),
            log: &ctx.log,
        }
    }

    fn summarize(
        &self,
        mut ctx: RunContext<'_>,
        resumed_from: Checkpoint,
        completed: bool,
        drain: Option<DrainReport>,
        final_count_matches: Option<bool>,
        started: Instant,
    ) -> RunSummary {
        if let Some(lock) = ctx.lock.take() {
            lock.release();
        }
        let summary = RunSummary {
            session_id: ctx.session_id,
            resumed_from,
            reached: ctx.state.checkpoint,
            completed,
            placement: ctx.placement,
            subfolders_created: ctx.subfolders_created,
            drain,
            counts: ctx.log.counts(),
            final_count_matches,
            duration: started.elapsed(),
        };
        info!(
            "Session {} {} at checkpoint {}: {} warnings, {} errors",
            summary.session_id,
            if completed { "finished" } else { "paused" },
            summary.reached,
            summary.counts.warnings,
            summary.counts.errors
        );
        summary
    }
}

/// Absolute form of `path`, canonical when it exists.
fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.exists() {
        fs::canonicalize(path)
    } else if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Directory holding the state file, created and canonicalized.
fn state_directory(state_file: &Path) -> io::Result<PathBuf> {
    let parent = match state_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    fs::canonicalize(parent)
}
