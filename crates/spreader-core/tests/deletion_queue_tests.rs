use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use spreader_core::deletion::{DeletionQueue, PendingDeletion, QueueJournal};
use std::io::Write;
use spreader_core::{DeletionGate, LogCounts, RetryPolicy, RunLog};

fn write_files(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("queued_{}.bin", i));
            fs::write(&path, vec![0xAB; 64 + i]).unwrap();
            path
        })
        .collect()
}

fn queue_of(files: &[PathBuf], session: &str) -> DeletionQueue {
    let mut queue = DeletionQueue::new();
    for file in files {
        queue.enqueue(file, session).unwrap();
    }
    queue
}

#[test]
fn test_drain_deletes_unchanged_files() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 3);
    let mut queue = queue_of(&files, "s1");
    let log = RunLog::new();

    let report = queue.drain(
        "s1",
        LogCounts::default(),
        DeletionGate::NoWarningsOrErrors,
        &RetryPolicy::immediate(2),
        &log,
    );

    assert!(report.gate_passed);
    assert_eq!(report.deleted, 3);
    assert!(queue.is_empty());
    assert!(files.iter().all(|f| !f.exists()));
    assert_eq!(log.counts().warnings, 0);
}

#[test]
fn test_other_sessions_are_left_alone() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 2);
    let mut queue = queue_of(&files[..1], "old-session");
    queue.enqueue(&files[1], "s2").unwrap();
    let log = RunLog::new();

    let report = queue.drain(
        "s2",
        LogCounts::default(),
        DeletionGate::NoErrors,
        &RetryPolicy::immediate(2),
        &log,
    );

    assert_eq!(report.foreign, 1);
    assert_eq!(report.deleted, 1);
    assert!(files[0].exists());
    assert!(!files[1].exists());
    assert_eq!(log.counts().warnings, 1);
}

#[test]
fn test_changed_file_is_not_deleted() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 2);
    let mut queue = queue_of(&files, "s1");
    fs::write(&files[0], b"rewritten after queueing").unwrap();
    let log = RunLog::new();

    let report = queue.drain(
        "s1",
        LogCounts::default(),
        DeletionGate::NoWarningsOrErrors,
        &RetryPolicy::immediate(2),
        &log,
    );

    assert_eq!(report.changed, 1);
    assert_eq!(report.deleted, 1);
    assert!(files[0].exists());
    assert!(!files[1].exists());
}

#[test]
fn test_missing_file_is_counted() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 2);
    let mut queue = queue_of(&files, "s1");
    fs::remove_file(&files[1]).unwrap();
    let log = RunLog::new();

    let report = queue.drain(
        "s1",
        LogCounts::default(),
        DeletionGate::NoErrors,
        &RetryPolicy::immediate(1),
        &log,
    );

    assert_eq!(report.missing, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(log.counts().errors, 0);
}

#[test]
fn test_failed_gate_keeps_everything() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 2);
    let mut queue = queue_of(&files, "s1");
    let log = RunLog::new();
    let counts = LogCounts {
        warnings: 2,
        errors: 0,
    };

    let report = queue.drain(
        "s1",
        counts,
        DeletionGate::NoWarningsOrErrors,
        &RetryPolicy::immediate(2),
        &log,
    );

    assert!(!report.gate_passed);
    assert_eq!(report.deleted, 0);
    assert_eq!(queue.len(), 2);
    assert!(files.iter().all(|f| f.exists()));
    assert_eq!(log.counts().warnings, 1, "the skip itself is a warning");

    // The looser gate tolerates the same warnings.
    let report = queue.drain(
        "s1",
        counts,
        DeletionGate::NoErrors,
        &RetryPolicy::immediate(2),
        &log,
    );
    assert!(report.gate_passed);
    assert_eq!(report.deleted, 2);
}

#[test]
fn test_queue_survives_persistence() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 3);
    let queue = queue_of(&files, "s1");

    let json = serde_json::to_string(queue.entries()).unwrap();
    let entries: Vec<PendingDeletion> = serde_json::from_str(&json).unwrap();
    let mut restored = DeletionQueue::from_entries(entries);
    assert_eq!(restored, queue);

    let report = restored.drain(
        "s1",
        LogCounts::default(),
        DeletionGate::NoWarningsOrErrors,
        &RetryPolicy::immediate(2),
        &RunLog::new(),
    );
    // Captured mtimes must still compare equal after the round trip.
    assert_eq!(report.changed, 0);
    assert_eq!(report.deleted, 3);
}

#[test]
fn test_journal_keeps_entries_of_the_current_session() {
    let tmp = tempdir().unwrap();
    let files = write_files(tmp.path(), 4);
    let journal_path = tmp.path().join("state").join("state.json.pending");

    let mut queue = DeletionQueue::new();
    queue.attach_journal(QueueJournal::open(&journal_path).unwrap());
    for file in &files[..3] {
        queue.enqueue(file, "s1").unwrap();
    }
    assert!(queue.detach_journal().is_some());
    // No longer written through once detached.
    queue.enqueue(&files[3], "s1").unwrap();

    let mut other = QueueJournal::open(&journal_path).unwrap();
    other
        .append(&PendingDeletion::capture(&files[3], "s0").unwrap())
        .unwrap();
    // A write cut short by a crash.
    let mut raw = fs::OpenOptions::new().append(true).open(&journal_path).unwrap();
    raw.write_all(b"{\"path\":\"/tmp/x\",\"si").unwrap();

    let log = RunLog::new();
    let recovered = QueueJournal::read(&journal_path, "s1", &log);
    assert_eq!(recovered, queue.entries()[..3].to_vec());
    assert_eq!(log.counts().warnings, 1);
    assert!(DeletionQueue::from_entries(recovered).contains(&files[0], "s1"));
}

#[test]
fn test_missing_journal_reads_empty() {
    let tmp = tempdir().unwrap();
    let log = RunLog::new();
    let entries = QueueJournal::read(&tmp.path().join("absent.pending"), "s1", &log);
    assert!(entries.is_empty());
    assert_eq!(log.counts().warnings, 0);
}
