use std::{
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

/// Replaces the content of `path` without ever exposing a partially written file.
///
/// Data goes into a temporary file in the same directory, is synced to disk and then renamed over
/// the destination. Readers see either the previous file or the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::write_atomic;

    #[test]
    fn test_write_atomic_creates_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");

        write_atomic(&path, b"{}")?;

        assert_eq!(fs::read_to_string(&path)?, "{}");
        Ok(())
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");

        write_atomic(&path, b"{\"a\":1}")?;
        write_atomic(&path, b"{}")?;

        assert_eq!(fs::read_to_string(&path)?, "{}");
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
