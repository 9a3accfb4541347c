//! Datastore write errors.
//!
//! A failed write is reported with the stage it failed at, purely for the
//! logs. Every caller treats every stage the same way: the event goes to the
//! fallback queue, or a drain pass is abandoned until the next tick.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Where in the connect/ping/insert sequence a write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStage {
    /// Opening the connection (DNS, TCP, TLS, authentication).
    Connect,
    /// Liveness check on a freshly opened connection.
    Ping,
    /// The parameterized insert itself.
    Insert,
}

impl fmt::Display for SinkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkStage::Connect => "connect",
            SinkStage::Ping => "ping",
            SinkStage::Insert => "insert",
        })
    }
}

/// A datastore write failure.
#[derive(Debug, Error)]
pub struct SinkError {
    /// The stage that failed.
    pub stage: SinkStage,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying driver error, if available.
    #[source]
    pub source: Option<tokio_postgres::Error>,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "datastore {} failed: {}", self.stage, self.message)
    }
}

impl SinkError {
    /// Wraps a driver error raised at `stage`.
    pub fn from_driver(stage: SinkStage, source: tokio_postgres::Error) -> Self {
        Self {
            stage,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// A stage that did not finish within `limit`.
    pub fn timed_out(stage: SinkStage, limit: Duration) -> Self {
        Self {
            stage,
            message: format!("timed out after {}s", limit.as_secs()),
            source: None,
        }
    }

    /// A failure with no driver error behind it.
    pub fn without_source(stage: SinkStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            source: None,
        }
    }
}
