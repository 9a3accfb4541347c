//! Shared test fakes and arbitrary generators for property-based testing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::sink::{EventSink, SinkError, SinkStage};
use crate::spool::SpoolRecord;
use crate::types::{HostName, TransitionSignal, UptimeEvent};

pub fn arb_signal() -> impl Strategy<Value = TransitionSignal> {
    prop_oneof![Just(TransitionSignal::On), Just(TransitionSignal::Off)]
}

pub fn arb_signals(max_len: usize) -> impl Strategy<Value = Vec<TransitionSignal>> {
    prop::collection::vec(arb_signal(), 0..max_len)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn event_at(secs: i64, kind: TransitionSignal) -> UptimeEvent {
    UptimeEvent::new(at(secs), HostName::new("test-host"), kind)
}

pub fn record_at(secs: i64, kind: TransitionSignal) -> SpoolRecord {
    SpoolRecord::new(at(secs), kind)
}

/// Collapses consecutive duplicates, the expected recorded sequence.
pub fn run_length_collapse(signals: &[TransitionSignal]) -> Vec<TransitionSignal> {
    let mut out: Vec<TransitionSignal> = Vec::new();
    for &s in signals {
        if out.last() != Some(&s) {
            out.push(s);
        }
    }
    out
}

/// A row accepted by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub at: DateTime<Utc>,
    pub host: HostName,
    pub kind: TransitionSignal,
}

/// In-memory datastore with switchable availability.
#[derive(Debug)]
pub struct MemorySink {
    rows: Mutex<Vec<Row>>,
    available: AtomicBool,
    attempts: AtomicUsize,
    /// 1-based attempt number that fails once even while available.
    fail_attempt: Mutex<Option<usize>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            rows: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            fail_attempt: Mutex::new(None),
        }
    }

    pub fn unavailable() -> Self {
        let sink = Self::new();
        sink.set_available(false);
        sink
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the `n`th insert attempt (counting from 1, all time) fail.
    pub fn fail_on_attempt(&self, n: usize) {
        *self.fail_attempt.lock().unwrap() = Some(n);
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<TransitionSignal> {
        self.rows().into_iter().map(|r| r.kind).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventSink for MemorySink {
    async fn insert(
        &self,
        at: DateTime<Utc>,
        host: &HostName,
        kind: TransitionSignal,
    ) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::without_source(
                SinkStage::Connect,
                "connection refused",
            ));
        }
        if *self.fail_attempt.lock().unwrap() == Some(attempt) {
            return Err(SinkError::without_source(SinkStage::Insert, "scripted failure"));
        }

        self.rows.lock().unwrap().push(Row {
            at,
            host: host.clone(),
            kind,
        });
        Ok(())
    }
}
