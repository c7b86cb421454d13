//! Bounded in-memory ring of traffic decisions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use shield_types::{TrafficAction, TrafficEntry};

/// Stores recent proxy decisions in a bounded ring and keeps running
/// totals for the management plane. Every recorded entry is also emitted
/// as a single JSON line on the process log stream.
pub struct TrafficLog {
    entries: RwLock<VecDeque<TrafficEntry>>,
    capacity: usize,
    requests_total: AtomicU64,
    blocked_total: AtomicU64,
}

impl TrafficLog {
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// A log bounded to `capacity` entries (0 selects the default).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { Self::DEFAULT_CAPACITY } else { capacity };
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            requests_total: AtomicU64::new(0),
            blocked_total: AtomicU64::new(0),
        }
    }

    /// Append one decision, evicting the oldest entry at capacity.
    pub fn record(&self, entry: TrafficEntry) {
        if let Ok(json) = serde_json::to_string(&entry) {
            tracing::info!(target: "shield::traffic", "{json}");
        }
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if matches!(entry.action, TrafficAction::Block | TrafficAction::Reject) {
            self.blocked_total.fetch_add(1, Ordering::Relaxed);
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent entries, newest first. `limit` of 0 returns all.
    pub fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let limit = if limit == 0 || limit > entries.len() {
            entries.len()
        } else {
            limit
        };
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Copy of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<TrafficEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (requests_total, blocked_total) since startup.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.requests_total.load(Ordering::Relaxed),
            self.blocked_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
