#[cfg(target_os = "windows")]
pub mod windows;

use crate::error::Error;
use std::path::{Path, PathBuf};

/// True for a drive designator with nothing after it: `D` or `D:`.
///
/// Joining onto such a path yields a drive-relative path (`D:foo`), which
/// lands wherever the process's current directory on that drive happens to be.
pub fn is_bare_drive(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    let bytes = raw.as_bytes();
    let looks_bare = match bytes {
        [letter] => letter.is_ascii_alphabetic(),
        [letter, b':'] => letter.is_ascii_alphabetic(),
        _ => false,
    };
    looks_bare || is_drive_prefix_only(path)
}

#[cfg(target_os = "windows")]
fn is_drive_prefix_only(path: &Path) -> bool {
    windows::is_drive_prefix_only(path)
}

#[cfg(not(target_os = "windows"))]
fn is_drive_prefix_only(_path: &Path) -> bool {
    false
}

/// Make a subfolder candidate safe to place files into.
///
/// Bare drive designators and relative paths are replaced with `target_root`;
/// everything else is returned unchanged.
pub fn normalize_subfolder(candidate: &Path, target_root: &Path) -> PathBuf {
    if candidate.as_os_str().is_empty() || is_bare_drive(candidate) || !candidate.is_absolute() {
        return target_root.to_path_buf();
    }
    candidate.to_path_buf()
}

/// The "move to recycle bin" collaborator.
pub trait Trash {
    fn move_to_trash(&self, path: &Path) -> Result<(), Error>;
}

/// System recycle bin / freedesktop trash via the `trash` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

impl Trash for SystemTrash {
    fn move_to_trash(&self, path: &Path) -> Result<(), Error> {
        trash::delete(path).map_err(|e| Error::Other(format!("trash error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_drive_detection() {
        assert!(is_bare_drive(Path::new("D")));
        assert!(is_bare_drive(Path::new("d:")));
        assert!(!is_bare_drive(Path::new("Dx")));
        assert!(!is_bare_drive(Path::new("/D")));
        assert!(!is_bare_drive(Path::new("1:")));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_normalize_subfolder() {
        let root = Path::new("/srv/target");
        assert_eq!(normalize_subfolder(Path::new("D:"), root), root);
        assert_eq!(normalize_subfolder(Path::new("D"), root), root);
        assert_eq!(normalize_subfolder(Path::new("relative/dir"), root), root);
        assert_eq!(normalize_subfolder(Path::new(""), root), root);
        assert_eq!(
            normalize_subfolder(Path::new("/srv/target/abc"), root),
            Path::new("/srv/target/abc")
        );
    }
}
