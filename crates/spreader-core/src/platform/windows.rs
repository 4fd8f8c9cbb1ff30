use std::path::{Component, Path, Prefix};

/// Drive letter of a `C:` or `\\?\C:` prefix, uppercased.
fn drive_letter(path: &Path) -> Option<char> {
    match path.components().next()? {
        Component::Prefix(prefix) => match prefix.kind() {
            Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                Some((letter as char).to_ascii_uppercase())
            }
            _ => None,
        },
        _ => None,
    }
}

/// `D:` with no root and no further components.
pub fn is_drive_prefix_only(path: &Path) -> bool {
    path.components().count() == 1 && drive_letter(path).is_some()
}
