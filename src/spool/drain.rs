//! Replaying the fallback queue into the datastore.
//!
//! A drain pass is all-or-nothing. Records are inserted in file order and the
//! first failure aborts the pass without removing anything, so records that
//! were inserted earlier in that pass are inserted again by the next
//! successful pass. The datastore may therefore hold duplicate rows after a
//! partial failure.
//!
//! The queue lock is released while inserts are in flight, so the recorder
//! can keep appending. On success only the bytes that were read are removed;
//! anything appended meanwhile is kept for the next pass.

use std::fs::OpenOptions;
use std::future::Future;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::persistence::fsync::{fsync_file, replace_atomic};
use crate::sink::SinkError;

use super::queue::{FallbackQueue, QueueError};
use super::record::SpoolRecord;

/// Errors that abort a drain pass.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The queue file could not be read or rewritten.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The datastore rejected a record. Nothing was removed from the queue.
    #[error("insert of queued record on line {line} failed: {source}")]
    Insert {
        /// 1-based line number of the failing record.
        line: usize,
        record: SpoolRecord,
        #[source]
        source: SinkError,
    },
}

/// Summary of a successful drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records inserted into the datastore.
    pub inserted: usize,
    /// Malformed lines that were skipped (and removed with the rest).
    pub skipped: usize,
    /// Whether records were appended while the pass was running and kept.
    pub appended_during_drain: bool,
}

impl FallbackQueue {
    /// Inserts every queued record through `inserter`, then empties the queue.
    ///
    /// See the module documentation for the failure semantics.
    pub async fn drain<F, Fut>(&self, mut inserter: F) -> Result<DrainReport, DrainError>
    where
        F: FnMut(SpoolRecord) -> Fut,
        Fut: Future<Output = Result<(), SinkError>>,
    {
        let snapshot = {
            let _guard = self.lock.lock().await;
            self.read_all()?
        };

        if snapshot.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport::default();
        let text = String::from_utf8_lossy(&snapshot);

        for (idx, line) in text.lines().enumerate() {
            let record = match SpoolRecord::parse_line(line) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(line = idx + 1, content = line, error = %e, "Skipping malformed queue line");
                    report.skipped += 1;
                    continue;
                }
            };

            if let Err(source) = inserter(record).await {
                return Err(DrainError::Insert {
                    line: idx + 1,
                    record,
                    source,
                });
            }
            report.inserted += 1;
        }

        report.appended_during_drain = self.remove_prefix(snapshot.len() as u64).await?;

        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Fallback queue drained"
        );
        Ok(report)
    }

    /// Removes the first `drained_len` bytes of the queue.
    ///
    /// Returns true if bytes appended after the drain's read were kept.
    async fn remove_prefix(&self, drained_len: u64) -> Result<bool, QueueError> {
        let _guard = self.lock.lock().await;
        let current = self.read_all()?;
        let current_len = current.len() as u64;

        if current_len == drained_len {
            let file = OpenOptions::new()
                .write(true)
                .open(self.path())
                .map_err(|e| self.io_error(e))?;
            file.set_len(0).map_err(|e| self.io_error(e))?;
            fsync_file(&file).map_err(|e| self.io_error(e))?;
            return Ok(false);
        }

        if current_len < drained_len {
            // Only this process writes the queue; a shorter file means someone
            // edited it by hand. Leave it alone rather than guess.
            warn!(
                path = %self.path().display(),
                expected = drained_len,
                found = current_len,
                "Queue shrank during drain, leaving it untouched"
            );
            return Ok(false);
        }

        let tail = &current[drained_len as usize..];
        debug!(kept_bytes = tail.len(), "Keeping records appended during drain");
        replace_atomic(self.path(), tail).map_err(|e| self.io_error(e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkStage;
    use crate::test_utils::{event_at, record_at};
    use crate::types::TransitionSignal::{self, Off, On};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn write_queue(path: &Path, lines: &[(i64, TransitionSignal)]) {
        let body: String = lines
            .iter()
            .map(|(secs, kind)| record_at(*secs, *kind).to_line())
            .collect();
        std::fs::write(path, body).unwrap();
    }

    fn refused() -> SinkError {
        SinkError::without_source(SinkStage::Connect, "connection refused")
    }

    #[tokio::test]
    async fn drain_of_missing_queue_is_noop() {
        let dir = tempdir().unwrap();
        let queue = FallbackQueue::new(dir.path().join("events.txt"));

        let report = queue
            .drain(|_| async { Err(refused()) })
            .await
            .unwrap();

        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn successful_drain_inserts_in_file_order_and_empties_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        write_queue(&path, &[(100, Off), (200, On), (300, Off)]);
        let queue = FallbackQueue::new(&path);

        let seen = Mutex::new(Vec::new());
        let report = queue
            .drain(|record| {
                seen.lock().unwrap().push(record);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.inserted, 3);
        assert!(!report.appended_during_drain);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![record_at(100, Off), record_at(200, On), record_at(300, Off)]
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn partial_failure_keeps_every_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        write_queue(&path, &[(100, Off), (200, On), (300, Off), (400, On)]);
        let before = std::fs::read(&path).unwrap();
        let queue = FallbackQueue::new(&path);

        // Fail on the third record.
        let mut calls = 0;
        let err = queue
            .drain(|_| {
                calls += 1;
                let fail = calls == 3;
                async move { if fail { Err(refused()) } else { Ok(()) } }
            })
            .await
            .unwrap_err();

        match err {
            DrainError::Insert { line, record, .. } => {
                assert_eq!(line, 3);
                assert_eq!(record, record_at(300, Off));
            }
            other => panic!("expected insert failure, got {other:?}"),
        }
        assert_eq!(calls, 3, "drain must stop at the first failure");
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn retry_after_partial_failure_reinserts_earlier_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        write_queue(&path, &[(100, Off), (200, On), (300, Off)]);
        let queue = FallbackQueue::new(&path);

        let inserted = Mutex::new(Vec::new());
        let _ = queue
            .drain(|record| {
                let fail = record == record_at(200, On);
                if !fail {
                    inserted.lock().unwrap().push(record);
                }
                async move { if fail { Err(refused()) } else { Ok(()) } }
            })
            .await
            .unwrap_err();

        queue
            .drain(|record| {
                inserted.lock().unwrap().push(record);
                async { Ok(()) }
            })
            .await
            .unwrap();

        // Record one was accepted twice: duplicates are expected.
        assert_eq!(
            *inserted.lock().unwrap(),
            vec![
                record_at(100, Off),
                record_at(100, Off),
                record_at(200, On),
                record_at(300, Off),
            ]
        );
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_without_aborting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        std::fs::write(&path, "100 off\ngarbage\n\n   \n200 maybe\n300 on\n").unwrap();
        let queue = FallbackQueue::new(&path);

        let seen = Mutex::new(Vec::new());
        let report = queue
            .drain(|record| {
                seen.lock().unwrap().push(record);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![record_at(100, Off), record_at(300, On)]
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn records_appended_during_drain_are_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.txt");
        write_queue(&path, &[(100, Off)]);
        let queue = FallbackQueue::new(&path);

        let report = queue
            .drain(|_| {
                let queue = &queue;
                async move {
                    // The recorder spools a new event while the insert is in flight.
                    queue.append(&event_at(200, On)).await.unwrap();
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(report.appended_during_drain);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "200 on\n");
        assert!(!dir.path().join("events.txt.tmp").exists());
    }
}
