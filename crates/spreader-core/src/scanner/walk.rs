use crate::diagnostics::RunLog;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursive listing of every regular file under `root`, skipping symlinks and
/// anything matching one of the glob ignore patterns.
///
/// Unreadable entries below the root are logged and skipped; an unreadable
/// root is an error.
pub fn list_source_files(
    root: &Path,
    ignore_globs: &[String],
    log: &RunLog,
) -> io::Result<Vec<PathBuf>> {
    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                log.warn(format!("Ignoring invalid glob pattern '{}': {}", glob, e));
                None
            }
        })
        .collect();

    fs::read_dir(root).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("Error reading directory {}: {}", root.display(), err),
        )
    })?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log.warn(format!("Skipping unreadable entry under {}: {}", root.display(), err));
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Immediate child directories of `root`, sorted.
pub fn list_subfolders(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Regular files directly inside `dir` (not recursive), sorted.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn count_files(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Every regular file anywhere under `root`; unreadable parts count as empty.
pub fn count_files_recursive(root: &Path) -> usize {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}
