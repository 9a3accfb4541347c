//! Reconciliation state machine.
//!
//! ```text
//!           arm()              timer              drain ok
//!   Idle ─────────► Armed ─────────► Draining ─────────► Idle
//!                    ▲                  │
//!       timer reset  │                  │ drain err
//!                    └──── Waiting ◄────┘
//! ```
//!
//! After a clean drain the reconciler re-arms itself if the queue is still
//! not empty.
//!
//! Only `Idle → Armed` is driven from outside; every other transition belongs
//! to the single reconciler task, so at most one retry sequence is alive
//! however many events are spooled meanwhile.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where the reconciler is in its retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    /// Nothing queued as far as the reconciler knows.
    Idle,
    /// Armed; waiting out the interval before the next drain.
    Armed,
    /// The last drain failed; the retry timer is being reset.
    Waiting,
    /// A drain pass is running.
    Draining,
}

impl ReconcileState {
    fn to_u8(self) -> u8 {
        match self {
            ReconcileState::Idle => 0,
            ReconcileState::Armed => 1,
            ReconcileState::Waiting => 2,
            ReconcileState::Draining => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ReconcileState::Armed,
            2 => ReconcileState::Waiting,
            3 => ReconcileState::Draining,
            _ => ReconcileState::Idle,
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileState::Idle => "idle",
            ReconcileState::Armed => "armed",
            ReconcileState::Waiting => "waiting",
            ReconcileState::Draining => "draining",
        })
    }
}

/// Lock-free cell shared between the reconciler task and its handles.
#[derive(Debug)]
pub(super) struct StateCell(AtomicU8);

impl StateCell {
    pub(super) fn new() -> Self {
        StateCell(AtomicU8::new(ReconcileState::Idle.to_u8()))
    }

    pub(super) fn get(&self) -> ReconcileState {
        ReconcileState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(super) fn set(&self, state: ReconcileState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Moves `Idle → Armed`. Returns false (and changes nothing) from any
    /// other state.
    pub(super) fn try_arm(&self) -> bool {
        self.0
            .compare_exchange(
                ReconcileState::Idle.to_u8(),
                ReconcileState::Armed.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}
