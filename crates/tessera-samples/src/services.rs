//! Services shared by the sample fragments.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that advances by one millisecond per reading.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub at_millis: u64,
    pub capability: String,
    pub method: String,
    pub succeeded: bool,
    pub detail: String,
}

/// Append-only record of audited calls.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
