//! The fallback queue file and its append path.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::persistence::fsync::{fsync_file, parent_dir};
use crate::types::UptimeEvent;

use super::record::SpoolRecord;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// IO error during file operations.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Append-only local log of events the datastore did not accept.
///
/// All file access goes through one async mutex, so an append from the
/// recorder and a drain from the reconciler never interleave their reads and
/// writes. The lock is never held while waiting on the datastore.
#[derive(Debug)]
pub struct FallbackQueue {
    path: PathBuf,
    pub(super) lock: Mutex<()>,
}

impl FallbackQueue {
    /// Creates a queue backed by `path`.
    ///
    /// Nothing is touched on disk until the first append; a missing file is an
    /// empty queue.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FallbackQueue {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the path to the queue file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn io_error(&self, source: io::Error) -> QueueError {
        QueueError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Appends one event as a newline-terminated record and fsyncs the file.
    ///
    /// If a previous crash left a torn final line, a newline is written first
    /// so the new record starts on its own line.
    pub async fn append(&self, event: &UptimeEvent) -> Result<SpoolRecord> {
        let record = SpoolRecord::from_event(event);
        let _guard = self.lock.lock().await;

        std::fs::create_dir_all(parent_dir(&self.path)).map_err(|e| self.io_error(e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let mut line = String::new();
        if !ends_with_newline(&mut file).map_err(|e| self.io_error(e))? {
            warn!(path = %self.path.display(), "Queue file ends mid-line, terminating it");
            line.push('\n');
        }
        line.push_str(&record.to_line());

        file.write_all(line.as_bytes())
            .map_err(|e| self.io_error(e))?;
        fsync_file(&file).map_err(|e| self.io_error(e))?;

        Ok(record)
    }

    /// Returns every well-formed record currently queued, in file order.
    ///
    /// Malformed lines are skipped; [`FallbackQueue::drain`] reports them.
    pub async fn records(&self) -> Result<Vec<SpoolRecord>> {
        let _guard = self.lock.lock().await;
        let bytes = self.read_all()?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .filter_map(|line| SpoolRecord::parse_line(line).ok().flatten())
            .collect())
    }

    /// Returns the number of well-formed queued records.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.records().await?.len())
    }

    /// Returns true if no well-formed record is queued.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Reads the whole file, treating a missing file as empty.
    ///
    /// Callers must hold `lock`.
    pub(super) fn read_all(&self) -> Result<Vec<u8>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Returns true if the file is empty or its last byte is `\n`.
fn ends_with_newline(file: &mut std::fs::File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
