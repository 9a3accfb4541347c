//! Uptime Recorder - records when a host becomes available or unavailable.
//!
//! OS power and session notifications become `on`/`off` transition signals.
//! Consecutive duplicates are collapsed, surviving events go to a Postgres
//! table, and a local queue file holds them while the datastore is down
//! until the reconciler replays them.

pub mod config;
pub mod persistence;
pub mod reconcile;
pub mod recorder;
pub mod sink;
pub mod source;
pub mod spool;
pub mod types;

#[cfg(test)]
mod test_utils;
