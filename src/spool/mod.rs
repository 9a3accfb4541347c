//! Durable fallback queue for events the datastore did not accept.
//!
//! The queue is a single text file with one record per line:
//!
//! ```text
//! 1700000000 off
//! 1700003600 on
//! ```
//!
//! # Durability
//!
//! - Appends are fsynced before [`FallbackQueue::append`] returns
//! - A torn final line left by a crash is terminated before the next append
//!   and skipped as malformed by drains
//! - When records must be kept after a drain, the remainder is written with
//!   temp file + rename + dir fsync
//!
//! # Draining
//!
//! [`FallbackQueue::drain`] replays records in file order and empties the
//! queue only when every record was accepted. See [`drain`] for the
//! duplicate-insert trade-off this implies.

pub mod drain;
pub mod queue;
pub mod record;

pub use drain::{DrainError, DrainReport};
pub use queue::{FallbackQueue, QueueError};
pub use record::{RecordParseError, SpoolRecord};
