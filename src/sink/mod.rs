//! The primary sink: the authoritative datastore for uptime events.
//!
//! The recorder and the reconciler only see the [`EventSink`] trait, so both
//! can be exercised against in-memory sinks. [`PostgresSink`] is the
//! production implementation.

mod error;
mod postgres;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::types::{HostName, TransitionSignal};

pub use error::{SinkError, SinkStage};
pub use postgres::{CONNECT_TIMEOUT, PostgresSink, STATEMENT_TIMEOUT};

/// Writes one event row to the datastore.
///
/// Each call is independent: no pooling, batching or retry happens behind
/// this trait. Retrying is the reconciler's job.
pub trait EventSink: Send + Sync {
    /// Inserts a single `(at, host, kind)` row.
    fn insert(
        &self,
        at: DateTime<Utc>,
        host: &HostName,
        kind: TransitionSignal,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}
