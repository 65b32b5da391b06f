//! Work queue bookkeeping
//!
//! Tracks, per object, when it is next due, which resource version the
//! controller last saw or wrote, whether a reconcile is in flight and how
//! often it has failed in a row. Pure state: the poller feeds it listings
//! and reconcile results.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use canary_core::domain::meta::ObjectKey;
use tokio::time::Instant;

use crate::reconciler::{Action, Reconciled};

const FAILURE_BASE_DELAY: Duration = Duration::from_millis(500);
const FAILURE_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Release,
    TestJob,
}

/// Queue identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub kind: ObjectKind,
    pub key: ObjectKey,
}

impl QueueKey {
    pub fn release(key: ObjectKey) -> Self {
        Self {
            kind: ObjectKind::Release,
            key,
        }
    }

    pub fn test_job(key: ObjectKey) -> Self {
        Self {
            kind: ObjectKind::TestJob,
            key,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ObjectKind::Release => write!(f, "release {}", self.key),
            ObjectKind::TestJob => write!(f, "testjob {}", self.key),
        }
    }
}

#[derive(Debug)]
struct Entry {
    /// `None` waits for an external change
    due: Option<Instant>,
    /// `None` adopts the next observed version as the baseline
    seen_version: Option<i64>,
    in_flight: bool,
    failures: u32,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    entries: HashMap<QueueKey, Entry>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a listed object and reports whether it should be reconciled
    ///
    /// An object is ready when it is new, its requeue time has passed, or
    /// its resource version differs from the last one the controller saw.
    /// Objects with a reconcile in flight are never ready.
    pub fn observe(&mut self, key: &QueueKey, resource_version: i64, now: Instant) -> bool {
        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            due: Some(now),
            seen_version: Some(resource_version),
            in_flight: false,
            failures: 0,
        });

        if entry.in_flight {
            return false;
        }

        let changed = match entry.seen_version {
            Some(seen) => seen != resource_version,
            None => {
                entry.seen_version = Some(resource_version);
                false
            }
        };

        changed || entry.due.is_some_and(|due| due <= now)
    }

    /// Marks a reconcile as dispatched
    pub fn start(&mut self, key: &QueueKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.in_flight = true;
        }
    }

    /// Records a successful pass
    pub fn complete(&mut self, key: &QueueKey, reconciled: Reconciled, now: Instant) {
        let Some(resource_version) = reconciled.resource_version else {
            self.entries.remove(key);
            return;
        };

        if let Some(entry) = self.entries.get_mut(key) {
            entry.in_flight = false;
            entry.failures = 0;
            entry.seen_version = Some(resource_version);
            entry.due = match reconciled.action {
                // A delay past the clock's range waits for a change instead
                Action::Requeue(delay) => now.checked_add(delay),
                Action::AwaitChange => None,
            };
        }
    }

    /// Records a failed pass and returns the backoff before the retry
    pub fn fail(&mut self, key: &QueueKey, now: Instant) -> Duration {
        let Some(entry) = self.entries.get_mut(key) else {
            return Duration::ZERO;
        };

        entry.in_flight = false;
        entry.failures += 1;
        // The failed pass may have written status; its version is unknown
        entry.seen_version = None;

        let delay = failure_delay(entry.failures);
        entry.due = Some(now + delay);
        delay
    }

    /// Drops entries whose object is no longer listed
    pub fn retain_listed(&mut self, listed: &HashSet<QueueKey>) {
        self.entries
            .retain(|key, entry| entry.in_flight || listed.contains(key));
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

/// 500ms doubling per consecutive failure, capped at 30s
pub fn failure_delay(failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.saturating_sub(1));
    FAILURE_BASE_DELAY
        .saturating_mul(factor)
        .min(FAILURE_MAX_DELAY)
}
