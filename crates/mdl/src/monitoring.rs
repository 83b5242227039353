//! Ambient lock-contention observability: not part of the MDL algorithm
//! proper, carried the way `CoreConfig`'s siblings in the teacher crate
//! carry ambient monitoring regardless of which features are in scope
//! (grounded in `monitoring/query_metrics.rs`'s `LockContentionTracker`).
//!
//! This crate's scheduler is purely synchronous (`WaitSlot::timed_wait`
//! blocks a thread, it never `.await`s), so unlike the teacher's
//! `tokio::sync::RwLock`-backed tracker, this one sits behind a plain
//! `std::sync::Mutex`.

use crate::error::MdlError;
use crate::key::{MdlKey, Namespace};
use crate::strategy::LockType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Why a wait ended, for contention bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentionOutcome {
    /// The wait ended in a grant.
    Granted,
    /// The wait deadline elapsed.
    TimedOut,
    /// This context was chosen as the deadlock victim.
    DeadlockVictim,
    /// The owning connection was killed or disconnected.
    Killed,
}

impl ContentionOutcome {
    /// Buckets an [`MdlError`] from a failed `acquire` into an outcome.
    #[must_use]
    pub fn from_error(err: &MdlError) -> Self {
        match err {
            MdlError::Deadlock => ContentionOutcome::DeadlockVictim,
            MdlError::Killed | MdlError::Disconnected => ContentionOutcome::Killed,
            MdlError::Timeout | MdlError::OutOfMemory | MdlError::UpgradeNotAllowed(_) => {
                ContentionOutcome::TimedOut
            }
        }
    }
}

/// One recorded lock wait, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockContentionEvent {
    /// The key that was waited on.
    pub key: MdlKey,
    /// The lock type the waiter requested.
    pub requested_type: LockType,
    /// How long the wait lasted, in milliseconds.
    pub waited_ms: u64,
    /// How the wait was resolved.
    pub outcome: ContentionOutcome,
    /// Unix timestamp, in seconds, when the event was recorded.
    pub timestamp_secs: u64,
}

#[derive(Debug)]
struct Inner {
    events: Vec<LockContentionEvent>,
    total_events: u64,
    total_wait_ms: u64,
    by_namespace: HashMap<Namespace, u64>,
    by_key: HashMap<MdlKey, u64>,
}

impl Inner {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            total_events: 0,
            total_wait_ms: 0,
            by_namespace: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

/// A bounded ring of recent contention events plus rolling counts, for a
/// host to expose on a diagnostics endpoint. Every `mdl::Manager` owns one
/// (§ "Expansion: metrics").
#[derive(Debug)]
pub struct LockContentionTracker {
    inner: Mutex<Inner>,
    max_events: usize,
}

impl Default for LockContentionTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl LockContentionTracker {
    /// A tracker retaining at most `max_events` of the most recent events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self { inner: Mutex::new(Inner::new()), max_events }
    }

    /// Records one wait's outcome.
    pub fn record(&self, key: MdlKey, requested_type: LockType, waited: Duration, outcome: ContentionOutcome) {
        let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.total_events += 1;
        inner.total_wait_ms += waited_ms;
        *inner.by_namespace.entry(key.namespace()).or_insert(0) += 1;
        *inner.by_key.entry(key.clone()).or_insert(0) += 1;

        let event = LockContentionEvent {
            key,
            requested_type,
            waited_ms,
            outcome,
            timestamp_secs: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
        };
        if inner.events.len() >= self.max_events {
            inner.events.remove(0);
        }
        inner.events.push(event);
    }

    /// Total number of events recorded since creation, independent of how
    /// many the ring currently retains.
    #[must_use]
    pub fn total_contentions(&self) -> u64 {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).total_events
    }

    /// Mean wait time across every event recorded, in milliseconds.
    #[must_use]
    pub fn avg_wait_ms(&self) -> f64 {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.total_events == 0 {
            0.0
        } else {
            inner.total_wait_ms as f64 / inner.total_events as f64
        }
    }

    /// Counts of contention events by namespace.
    #[must_use]
    pub fn by_namespace(&self) -> HashMap<Namespace, u64> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).by_namespace.clone()
    }

    /// The `limit` keys with the most contention events, most-contended first.
    #[must_use]
    pub fn hot_keys(&self, limit: usize) -> Vec<(MdlKey, u64)> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut ranked: Vec<(MdlKey, u64)> = inner.by_key.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }

    /// The most recent events still retained, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<LockContentionEvent> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).events.clone()
    }
}
