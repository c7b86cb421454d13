//! Bounded session event store and the per-session audit logger.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use shield_types::{SessionEvent, SessionEventKind};

use crate::{system_clock, Clock};

/// Default capacity of the session event ring.
pub const DEFAULT_SESSION_LOG_LIMIT: usize = 10_000;

/// In-memory ring of session events. Every added event is also emitted as
/// one JSON line on the process log stream.
pub struct SessionLogStore {
    events: RwLock<VecDeque<SessionEvent>>,
    limit: usize,
}

impl SessionLogStore {
    /// A ring bounded to `limit` events (0 selects the default).
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 { DEFAULT_SESSION_LOG_LIMIT } else { limit };
        Self {
            events: RwLock::new(VecDeque::with_capacity(limit.min(1024))),
            limit,
        }
    }

    /// Append an event, evicting the oldest at capacity.
    pub fn add(&self, event: SessionEvent) {
        if let Ok(json) = serde_json::to_string(&event) {
            tracing::info!(target: "shield::bastion", "{json}");
        }
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.limit {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// A defensive copy of one page of events plus the total count.
    pub fn list(&self, offset: usize, limit: usize) -> (Vec<SessionEvent>, usize) {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let total = events.len();
        let limit = if limit == 0 { total } else { limit };
        let start = offset.min(total);
        let end = start.saturating_add(limit).min(total);
        (events.iter().skip(start).take(end - start).cloned().collect(), total)
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_LOG_LIMIT)
    }
}

/// Records connect/disconnect/command events for bastion sessions,
/// computing each session's duration at disconnect.
pub struct SessionLogger {
    store: Arc<SessionLogStore>,
    starts: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Clock,
}

impl SessionLogger {
    pub fn new(store: Arc<SessionLogStore>) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: Arc<SessionLogStore>, clock: Clock) -> Self {
        Self {
            store,
            starts: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// The underlying event store.
    pub fn store(&self) -> &Arc<SessionLogStore> {
        &self.store
    }

    /// Record a session start.
    pub fn log_connect(&self, session_id: &str, grant_id: &str, principal: &str, target: &str) {
        let now = (self.clock)();
        self.starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), now);
        self.store.add(SessionEvent {
            session_id: session_id.to_string(),
            grant_id: grant_id.to_string(),
            principal: principal.to_string(),
            target: target.to_string(),
            event: SessionEventKind::Connect,
            timestamp: now,
            data: None,
        });
    }

    /// Record a session end; the event's data is the session duration.
    pub fn log_disconnect(&self, session_id: &str, grant_id: &str, principal: &str, target: &str) {
        let now = (self.clock)();
        let duration = self
            .starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .map(|start| now - start)
            .unwrap_or_else(chrono::TimeDelta::zero);
        let duration = duration.to_std().unwrap_or_default();

        self.store.add(SessionEvent {
            session_id: session_id.to_string(),
            grant_id: grant_id.to_string(),
            principal: principal.to_string(),
            target: target.to_string(),
            event: SessionEventKind::Disconnect,
            timestamp: now,
            data: Some(humantime::format_duration(duration).to_string()),
        });
    }

    /// Record a command executed during a session.
    pub fn log_command(
        &self,
        session_id: &str,
        grant_id: &str,
        principal: &str,
        target: &str,
        command: &str,
    ) {
        self.store.add(SessionEvent {
            session_id: session_id.to_string(),
            grant_id: grant_id.to_string(),
            principal: principal.to_string(),
            target: target.to_string(),
            event: SessionEventKind::Command,
            timestamp: (self.clock)(),
            data: Some(command.to_string()),
        });
    }
}
