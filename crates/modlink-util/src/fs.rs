use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Walk from `start` towards the filesystem root, returning the first directory
/// that contains a file named `marker`.
#[must_use]
pub fn find_ancestor_with(start: &Path, marker: &str) -> Option<PathBuf> {
    let mut current = if start.is_file() {
        start.parent()
    } else {
        Some(start)
    };

    while let Some(dir) = current {
        if dir.join(marker).is_file() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }

    None
}
