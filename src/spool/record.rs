//! Line codec for fallback queue records.
//!
//! Each record is one line: `<unix-seconds> <kind>\n`, where kind is `on` or
//! `off`. Surrounding whitespace is ignored and blank lines carry no record.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::event::{UptimeEvent, from_unix_seconds};
use crate::types::signal::{TransitionSignal, UnknownSignal};

/// A line that could not be decoded into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordParseError {
    /// The line has a timestamp but no kind token.
    #[error("missing kind token")]
    MissingKind,

    /// The first token is not an integer.
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// The timestamp is an integer chrono cannot represent.
    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    /// The kind token is not `on`/`off`.
    #[error(transparent)]
    UnknownKind(#[from] UnknownSignal),

    /// More than two tokens on the line.
    #[error("unexpected trailing data: {0:?}")]
    TrailingData(String),
}

/// One queued event awaiting reconciliation.
///
/// The host is not stored: it is the configured identity of whichever process
/// drains the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoolRecord {
    /// Observation time, whole seconds.
    pub at: DateTime<Utc>,
    pub kind: TransitionSignal,
}

impl SpoolRecord {
    pub fn new(at: DateTime<Utc>, kind: TransitionSignal) -> Self {
        SpoolRecord { at, kind }
    }

    /// Builds the record for an event, dropping sub-second precision.
    pub fn from_event(event: &UptimeEvent) -> Self {
        let at = from_unix_seconds(event.unix_seconds()).unwrap_or(event.at);
        SpoolRecord {
            at,
            kind: event.kind,
        }
    }

    /// Encodes the record as a newline-terminated queue line.
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.at.timestamp(), self.kind)
    }

    /// Decodes one queue line.
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse_line(line: &str) -> Result<Option<Self>, RecordParseError> {
        let mut tokens = line.split_whitespace();

        let Some(ts) = tokens.next() else {
            return Ok(None);
        };
        let secs: i64 = ts
            .parse()
            .map_err(|_| RecordParseError::InvalidTimestamp(ts.to_string()))?;
        let at = from_unix_seconds(secs).ok_or(RecordParseError::TimestampOutOfRange(secs))?;

        let kind: TransitionSignal = tokens.next().ok_or(RecordParseError::MissingKind)?.parse()?;

        if let Some(extra) = tokens.next() {
            return Err(RecordParseError::TrailingData(extra.to_string()));
        }

        Ok(Some(SpoolRecord { at, kind }))
    }
}
