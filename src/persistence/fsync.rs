//! Durability helpers for the fallback queue file.
//!
//! Appends are followed by a file fsync. Replacing the queue contents goes
//! through a temp file, a rename, and a directory fsync so that a power loss
//! leaves either the old or the new contents, never a torn mix.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created or renamed in it are durable.
///
/// Only meaningful on Unix; elsewhere directories cannot be opened as files
/// and this is a no-op.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    if cfg!(unix) {
        let dir = OpenOptions::new().read(true).open(dir_path)?;
        dir.sync_all()
    } else {
        Ok(())
    }
}

/// Returns the directory holding `path`, treating a bare file name as `.`.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Atomically replaces the contents of `path` with `bytes`.
///
/// Writes `<path>.tmp`, fsyncs it, renames it over `path`, then fsyncs the
/// parent directory.
pub fn replace_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;
    fsync_dir(&parent_dir(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fsync_dir_works() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("events.txt")).unwrap();
        fsync_dir(dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        let result = fsync_dir(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(result.is_err());
    }

    #[test]
    fn parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("events.txt")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/var/lib/x.txt")), PathBuf::from("/var/lib"));
    }

    #[test]
    fn replace_atomic_overwrites_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        std::fs::write(&path, b"old contents\n").unwrap();

        replace_atomic(&path, b"new\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new\n");
        assert!(!dir.path().join("events.txt.tmp").exists());
    }
}
