//! Background reconciliation of the fallback queue.
//!
//! Whenever the recorder spools an event it arms the [`Reconciler`]. The
//! reconciler owns exactly one retry sequence: it waits a fixed interval,
//! drains the queue into the datastore, and repeats on failure until a pass
//! succeeds. Arming an already active reconciler does nothing.

mod scheduler;
mod state;

pub use scheduler::{RETRY_INTERVAL, Reconciler, ReconcilerHandle};
pub use state::ReconcileState;
