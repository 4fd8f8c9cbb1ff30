pub mod walk;

pub use walk::{count_files, count_files_recursive, list_files, list_source_files, list_subfolders};
