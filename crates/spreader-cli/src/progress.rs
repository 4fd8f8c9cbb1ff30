use indicatif::{ProgressBar, ProgressStyle};
use spreader_core::deletion::DrainReport;
use spreader_core::{Checkpoint, ProgressReporter};
use std::sync::Mutex;
use std::time::Duration;

/// CLI progress reporter using indicatif progress bars.
///
/// - Validation and enumeration: spinner
/// - Distribution and redistribution: progress bar over the batch
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn bar(label: &str, total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files ({{eta}} remaining)",
            label
        );
        if let Ok(style) = ProgressStyle::with_template(&template) {
            pb.set_style(style.progress_chars("━╸─").tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_phase_start(&self, checkpoint: Checkpoint, total: usize) {
        let pb = match checkpoint {
            Checkpoint::Distributed => Self::bar("Distributing", total),
            Checkpoint::Redistributed => Self::bar("Rebalancing", total),
            Checkpoint::Prepared => Self::spinner("Validating inputs...".to_string()),
            _ => Self::spinner("Enumerating source and target...".to_string()),
        };
        self.set_bar(pb);
    }

    fn on_file_placed(&self, done: usize, total: usize) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                if pb.length() != Some(total as u64) {
                    pb.set_length(total as u64);
                }
                pb.set_position(done as u64);
            }
        }
    }

    fn on_phase_complete(&self, checkpoint: Checkpoint, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Checkpoint {} reached in {:.2}s",
            checkpoint, duration_secs
        );
    }

    fn on_drain_complete(&self, report: &DrainReport) {
        if report.gate_passed {
            eprintln!(
                "  \x1b[32m✓\x1b[0m Deferred deletion: {} deleted, {} skipped",
                report.deleted,
                report.failed + report.changed + report.missing + report.foreign
            );
        } else {
            eprintln!("  \x1b[33m!\x1b[0m Deferred deletion skipped, source files kept");
        }
    }
}
