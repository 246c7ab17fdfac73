use std::fs::File;
use std::io;
use std::path::Path;

/// Hex-encoded BLAKE3 digest of module source text.
#[must_use]
pub fn content_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

/// Hex-encoded BLAKE3 digest of a file on disk.
///
/// Hashes raw bytes, so a file whose bytes are valid UTF-8 hashes identically
/// to [`content_hash`] over the same text.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_WORLD: &str = "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24";

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(content_hash("hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_file_hash_matches_content_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(file_hash(file.path()).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_file_hash_not_found() {
        assert!(file_hash(Path::new("/nonexistent/module.js")).is_err());
    }
}
