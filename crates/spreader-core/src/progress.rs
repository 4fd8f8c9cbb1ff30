use crate::deletion::DrainReport;
use crate::state::Checkpoint;

/// Trait for reporting distribution progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    /// Work toward `checkpoint` has started; `total` is the number of files
    /// it will place, when known.
    fn on_phase_start(&self, _checkpoint: Checkpoint, _total: usize) {}
    fn on_file_placed(&self, _done: usize, _total: usize) {}
    fn on_phase_complete(&self, _checkpoint: Checkpoint, _duration_secs: f64) {}
    fn on_drain_complete(&self, _report: &DrainReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
