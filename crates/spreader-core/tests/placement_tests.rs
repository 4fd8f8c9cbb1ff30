use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::tempdir;

use spreader_core::deletion::DeletionQueue;
use spreader_core::naming::NameGenerator;
use spreader_core::placement::{PlacementEngine, TransferMode};
use spreader_core::platform::Trash;
use spreader_core::scanner;
use spreader_core::{DeleteMode, Error, RetryPolicy, RunLog, SilentReporter};

/// Hands out `n0000`, `n0001`, ... after any scripted names are used up.
#[derive(Default)]
struct ScriptedNames {
    scripted: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl ScriptedNames {
    fn with_script(names: &[&str]) -> Self {
        let mut scripted: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        scripted.reverse();
        Self {
            scripted: Mutex::new(scripted),
            counter: AtomicUsize::new(0),
        }
    }
}

impl NameGenerator for ScriptedNames {
    fn generate(&self) -> String {
        if let Some(name) = self.scripted.lock().unwrap().pop() {
            return name;
        }
        format!("n{:04}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// Deletes instead of trashing and remembers what it was given.
#[derive(Default)]
struct RecordingTrash {
    trashed: Mutex<Vec<PathBuf>>,
}

impl Trash for RecordingTrash {
    fn move_to_trash(&self, path: &Path) -> Result<(), Error> {
        fs::remove_file(path)?;
        self.trashed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    source: PathBuf,
    target: PathBuf,
    retry: RetryPolicy,
    names: ScriptedNames,
    trash: RecordingTrash,
    log: RunLog,
}

impl Fixture {
    fn new(source_files: usize) -> Self {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        let target = tmp.path().join("target");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&target).unwrap();
        for i in 0..source_files {
            fs::write(source.join(format!("file_{:03}.dat", i)), format!("content {}", i)).unwrap();
        }
        Self {
            _tmp: tmp,
            source,
            target,
            retry: RetryPolicy::immediate(2),
            names: ScriptedNames::default(),
            trash: RecordingTrash::default(),
            log: RunLog::new(),
        }
    }

    fn engine(&self, limit: usize, delete_mode: DeleteMode) -> PlacementEngine<'_> {
        PlacementEngine {
            target_root: &self.target,
            files_per_folder: limit,
            delete_mode,
            session_id: "session-test",
            retry: &self.retry,
            names: &self.names,
            trash: &self.trash,
            log: &self.log,
        }
    }

    fn subfolders(&self, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let dir = self.target.join(n);
                fs::create_dir_all(&dir).unwrap();
                dir
            })
            .collect()
    }

    fn source_files(&self) -> Vec<PathBuf> {
        scanner::list_files(&self.source).unwrap()
    }
}

#[test]
fn test_distribute_balances_within_cap() {
    let fx = Fixture::new(30);
    let folders = fx.subfolders(&["a", "b", "c"]);
    let mut queue = DeletionQueue::new();

    let report = fx
        .engine(10, DeleteMode::Immediate)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(report.placed, 30);
    assert_eq!(report.failed, 0);
    assert_eq!(report.fallbacks, 0);
    for folder in &folders {
        assert_eq!(scanner::count_files(folder).unwrap(), 10);
    }
    // Immediate mode removed every verified original.
    assert!(fx.source_files().is_empty());
    assert_eq!(fx.log.counts().warnings, 0);
}

#[test]
fn test_existing_counts_are_respected() {
    let fx = Fixture::new(6);
    let folders = fx.subfolders(&["full", "empty"]);
    for i in 0..4 {
        fs::write(folders[0].join(format!("old_{}.dat", i)), b"old").unwrap();
    }
    let mut queue = DeletionQueue::new();

    fx.engine(5, DeleteMode::Immediate)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    // Least-filled first: "empty" catches up to 4, then both share the rest.
    assert_eq!(scanner::count_files(&folders[0]).unwrap(), 5);
    assert_eq!(scanner::count_files(&folders[1]).unwrap(), 5);
}

#[test]
fn test_deferred_mode_queues_originals() {
    let fx = Fixture::new(5);
    let folders = fx.subfolders(&["a"]);
    let mut queue = DeletionQueue::new();

    fx.engine(10, DeleteMode::Deferred)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(queue.len(), 5);
    assert_eq!(fx.source_files().len(), 5, "nothing deleted yet");
    assert!(queue.entries().iter().all(|e| e.session_id == "session-test"));
    assert!(queue.entries().iter().all(|e| e.size > 0));
}

#[test]
fn test_recycle_bin_mode_uses_trash() {
    let fx = Fixture::new(4);
    let folders = fx.subfolders(&["a"]);
    let mut queue = DeletionQueue::new();

    fx.engine(10, DeleteMode::RecycleBin)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(fx.trash.trashed.lock().unwrap().len(), 4);
    assert!(queue.is_empty());
}

#[test]
fn test_extension_is_kept_and_content_copied() {
    let fx = Fixture::new(0);
    fs::write(fx.source.join("photo.JPG"), b"jpeg bytes").unwrap();
    let folders = fx.subfolders(&["a"]);
    let mut queue = DeletionQueue::new();

    fx.engine(10, DeleteMode::Deferred)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    let placed = scanner::list_files(&folders[0]).unwrap();
    assert_eq!(placed, vec![folders[0].join("n0000.JPG")]);
    assert_eq!(fs::read(&placed[0]).unwrap(), b"jpeg bytes");
}

#[test]
fn test_name_collision_generates_another_name() {
    let mut fx = Fixture::new(0);
    fx.names = ScriptedNames::with_script(&["taken", "fresh"]);
    fs::write(fx.source.join("doc.txt"), b"new").unwrap();
    let folders = fx.subfolders(&["a"]);
    fs::write(folders[0].join("taken.txt"), b"existing").unwrap();
    let mut queue = DeletionQueue::new();

    fx.engine(10, DeleteMode::Deferred)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(fs::read(folders[0].join("taken.txt")).unwrap(), b"existing");
    assert_eq!(fs::read(folders[0].join("fresh.txt")).unwrap(), b"new");
}

#[cfg(not(target_os = "windows"))]
#[test]
fn test_bad_candidates_never_put_files_in_root() {
    let fx = Fixture::new(8);
    let mut folders = vec![PathBuf::from("D:"), PathBuf::from("relative")];
    folders.extend(fx.subfolders(&["real"]));
    let mut queue = DeletionQueue::new();

    let report = fx
        .engine(100, DeleteMode::Deferred)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(report.placed, 8);
    assert_eq!(scanner::list_files(&fx.target).unwrap().len(), 0);
    assert_eq!(scanner::count_files(&fx.target.join("real")).unwrap(), 8);
    // One warning per rejected candidate.
    assert_eq!(fx.log.counts().warnings, 2);
}

#[test]
fn test_fallback_when_every_folder_is_full() {
    let fx = Fixture::new(2);
    let folders = fx.subfolders(&["a"]);
    for i in 0..3 {
        fs::write(folders[0].join(format!("old_{}.dat", i)), b"old").unwrap();
    }
    let mut queue = DeletionQueue::new();

    let report = fx
        .engine(3, DeleteMode::Deferred)
        .distribute(&fx.source_files(), &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(report.placed, 2);
    assert_eq!(report.fallbacks, 2);
    assert_eq!(fx.log.counts().warnings, 2);
}

#[test]
fn test_ensure_capacity_adds_subfolders() {
    let fx = Fixture::new(0);
    let mut folders = fx.subfolders(&["a"]);
    for i in 0..7 {
        fs::write(folders[0].join(format!("old_{}.dat", i)), b"old").unwrap();
    }

    // 3 free slots in "a"; 25 incoming at 10 per folder needs 3 more folders.
    let created = fx.engine(10, DeleteMode::Deferred).ensure_capacity(&mut folders, 25);
    assert_eq!(created, 3);
    assert_eq!(folders.len(), 4);
    assert!(folders.iter().all(|f| f.is_dir() && f.starts_with(&fx.target)));
    assert_eq!(scanner::list_subfolders(&fx.target).unwrap().len(), 4);
}

#[test]
fn test_move_mode_relocates_without_deleting_policy() {
    let fx = Fixture::new(0);
    let folders = fx.subfolders(&["a", "b"]);
    for i in 0..4 {
        fs::write(fx.target.join(format!("stray_{}.dat", i)), b"stray").unwrap();
    }
    let strays = scanner::list_files(&fx.target).unwrap();
    let mut queue = DeletionQueue::new();

    let report = fx
        .engine(10, DeleteMode::Deferred)
        .distribute(&strays, &folders, TransferMode::Move, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(report.placed, 4);
    assert!(queue.is_empty());
    assert!(scanner::list_files(&fx.target).unwrap().is_empty());
    assert_eq!(scanner::count_files_recursive(&fx.target), 4);
}

#[test]
fn test_vanished_files_are_skipped() {
    let fx = Fixture::new(3);
    let folders = fx.subfolders(&["a"]);
    let mut files = fx.source_files();
    files.push(fx.source.join("already_gone.dat"));
    let mut queue = DeletionQueue::new();

    let report = fx
        .engine(10, DeleteMode::Deferred)
        .distribute(&files, &folders, TransferMode::Copy, &mut queue, &SilentReporter)
        .unwrap();

    assert_eq!(report.placed, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(fx.log.counts().errors, 0);
}

#[test]
fn test_no_subfolders_is_an_error() {
    let fx = Fixture::new(1);
    let mut queue = DeletionQueue::new();

    let result = fx.engine(10, DeleteMode::Deferred).distribute(
        &fx.source_files(),
        &[],
        TransferMode::Copy,
        &mut queue,
        &SilentReporter,
    );
    assert!(matches!(result, Err(Error::NoSubfolders(_))));
}
