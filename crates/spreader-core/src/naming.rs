use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;

/// Source of collision-resistant, filesystem-safe names for placed files and
/// new subfolders.
pub trait NameGenerator {
    fn generate(&self) -> String;
}

/// Lowercase alphanumeric tokens of a fixed length.
#[derive(Debug, Clone)]
pub struct RandomNameGenerator {
    length: usize,
}

impl RandomNameGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }
}

impl Default for RandomNameGenerator {
    fn default() -> Self {
        Self::new(12)
    }
}

impl NameGenerator for RandomNameGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect()
    }
}

/// `<token>.<ext>` keeping the original extension, or just `<token>`.
pub fn file_name_with_extension(token: &str, original: &Path) -> String {
    match original.extension() {
        Some(ext) => format!("{}.{}", token, ext.to_string_lossy()),
        None => token.to_string(),
    }
}
