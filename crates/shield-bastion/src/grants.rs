//! File-backed store of time-limited access grants.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use shield_types::Grant;

use crate::fsutil::write_atomic;
use crate::{system_clock, Clock};

struct GrantState {
    grants: HashMap<String, Grant>,
    counter: u64,
}

/// Grants held in memory and mirrored to a JSON file via atomic writes.
///
/// With no path configured, grants live only in memory.
pub struct GrantStore {
    state: RwLock<GrantState>,
    path: Option<PathBuf>,
    clock: Clock,
}

impl GrantStore {
    /// A store persisting to `path` (loaded immediately if it exists).
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::with_clock(path, system_clock())
    }

    /// As `new` with an injectable clock.
    pub fn with_clock(path: Option<PathBuf>, clock: Clock) -> Self {
        let store = Self {
            state: RwLock::new(GrantState {
                grants: HashMap::new(),
                counter: 0,
            }),
            path,
            clock,
        };
        store.load();
        store
    }

    /// Create a grant expiring `duration` from now and persist it.
    pub fn add(
        &self,
        principal: &str,
        target: &str,
        created_by: &str,
        duration: Duration,
    ) -> Grant {
        let now = (self.clock)();
        let ttl = chrono::Duration::from_std(duration).unwrap_or(chrono::TimeDelta::MAX);

        let mut state = self.write();
        state.counter += 1;
        let grant = Grant {
            id: generate_grant_id(now, state.counter),
            principal: principal.to_string(),
            target: target.to_string(),
            expires_at: now + ttl,
            created_at: now,
            created_by: created_by.to_string(),
        };
        state.grants.insert(grant.id.clone(), grant.clone());
        self.persist(&state);
        grant
    }

    /// Fetch a grant by id; expired and missing grants both yield `None`.
    pub fn get(&self, id: &str) -> Option<Grant> {
        let state = self.read();
        let grant = state.grants.get(id)?;
        if !grant.is_active_at((self.clock)()) {
            return None;
        }
        Some(grant.clone())
    }

    /// Revoke a grant. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.write();
        if state.grants.remove(id).is_none() {
            return false;
        }
        self.persist(&state);
        true
    }

    /// All grants, expired ones included.
    pub fn list(&self) -> Vec<Grant> {
        self.read().grants.values().cloned().collect()
    }

    /// Only grants that have not expired.
    pub fn list_active(&self) -> Vec<Grant> {
        let now = (self.clock)();
        self.read()
            .grants
            .values()
            .filter(|g| g.is_active_at(now))
            .cloned()
            .collect()
    }

    /// The first active grant whose principal matches exactly and whose
    /// target covers the requested target (exact or `*`).
    pub fn validate_access(&self, principal: &str, target: &str) -> Option<Grant> {
        let now = (self.clock)();
        self.read()
            .grants
            .values()
            .find(|g| g.is_active_at(now) && g.principal == principal && g.covers_target(target))
            .cloned()
    }

    /// Purge expired grants, re-persisting if anything was removed.
    /// Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = (self.clock)();
        let mut state = self.write();
        let before = state.grants.len();
        state.grants.retain(|_, g| g.is_active_at(now));
        let removed = before - state.grants.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    /// Number of stored grants, expired ones included.
    pub fn len(&self) -> usize {
        self.read().grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mirror the current map to disk. Persistence failures are logged and
    /// otherwise ignored: the in-memory store stays authoritative.
    fn persist(&self, state: &GrantState) {
        let Some(path) = &self.path else {
            return;
        };
        let mut grants: Vec<&Grant> = state.grants.values().collect();
        grants.sort_by(|a, b| a.id.cmp(&b.id));
        let data = match serde_json::to_vec_pretty(&grants) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize grants");
                return;
            }
        };
        if let Err(e) = write_atomic(path, &data, 0o600) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist grants");
        }
    }

    fn load(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(_) => return,
        };
        let grants: Vec<Grant> = match serde_json::from_slice(&data) {
            Ok(grants) => grants,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse grants file");
                return;
            }
        };
        let mut state = self.write();
        for grant in grants {
            state.grants.insert(grant.id.clone(), grant);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GrantState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GrantState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Opaque id from the creation instant plus a monotonic counter.
fn generate_grant_id(now: DateTime<Utc>, counter: u64) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_default().max(0) as u128;
    format!("grant-{}-{}", to_base36(nanos), to_base36(counter as u128))
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn test_clock() -> (Clock, Arc<AtomicI64>) {
        let base = Utc::now();
        let offset = Arc::new(AtomicI64::new(0));
        let clock_offset = Arc::clone(&offset);
        let clock: Clock = Arc::new(move || {
            base + ChronoDuration::seconds(clock_offset.load(Ordering::SeqCst))
        });
        (clock, offset)
    }

    #[test]
    fn add_and_get() {
        let (clock, _) = test_clock();
        let store = GrantStore::with_clock(None, clock);

        let grant = store.add("alice", "agent-1", "cli", Duration::from_secs(1800));
        assert!(grant.id.starts_with("grant-"));
        assert_eq!(grant.expires_at - grant.created_at, ChronoDuration::seconds(1800));

        let fetched = store.get(&grant.id).unwrap();
        assert_eq!(fetched, grant);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn get_hides_expired_grants() {
        let (clock, offset) = test_clock();
        let store = GrantStore::with_clock(None, clock);
        let grant = store.add("alice", "agent-1", "cli", Duration::from_secs(1800));

        offset.store(29 * 60, Ordering::SeqCst);
        assert!(store.get(&grant.id).is_some());

        offset.store(30 * 60, Ordering::SeqCst);
        assert!(store.get(&grant.id).is_none(), "expired at the boundary");
    }

    #[test]
    fn validate_access_matching() {
        let (clock, offset) = test_clock();
        let store = GrantStore::with_clock(None, clock);
        store.add("alice", "agent-1", "cli", Duration::from_secs(1800));
        store.add("bob", "*", "cli", Duration::from_secs(1800));

        assert!(store.validate_access("alice", "agent-1").is_some());
        assert!(store.validate_access("alice", "agent-2").is_none());
        assert!(store.validate_access("mallory", "agent-1").is_none());
        // Wildcard target covers anything, exact principal still required.
        assert!(store.validate_access("bob", "agent-7").is_some());

        offset.store(31 * 60, Ordering::SeqCst);
        assert!(store.validate_access("alice", "agent-1").is_none());
    }

    #[test]
    fn delete_revokes() {
        let store = GrantStore::new(None);
        let grant = store.add("alice", "agent-1", "cli", Duration::from_secs(60));
        assert!(store.delete(&grant.id));
        assert!(store.get(&grant.id).is_none());
        assert!(!store.delete(&grant.id));
    }

    #[test]
    fn list_active_filters_expired() {
        let (clock, offset) = test_clock();
        let store = GrantStore::with_clock(None, clock);
        store.add("alice", "a", "cli", Duration::from_secs(60));
        store.add("bob", "b", "cli", Duration::from_secs(3600));

        offset.store(120, Ordering::SeqCst);
        assert_eq!(store.list().len(), 2);
        let active = store.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].principal, "bob");
    }

    #[test]
    fn cleanup_purges_expired() {
        let (clock, offset) = test_clock();
        let store = GrantStore::with_clock(None, clock);
        store.add("alice", "a", "cli", Duration::from_secs(60));
        store.add("bob", "b", "cli", Duration::from_secs(3600));

        assert_eq!(store.cleanup(), 0);
        offset.store(120, Ordering::SeqCst);
        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");

        let store = GrantStore::new(Some(path.clone()));
        let g1 = store.add("alice", "agent-1", "cli", Duration::from_secs(3600));
        let g2 = store.add("bob", "*", "api", Duration::from_secs(3600));

        let reloaded = GrantStore::new(Some(path.clone()));
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&g1.id).unwrap().principal, "alice");
        assert_eq!(reloaded.get(&g2.id).unwrap().target, "*");

        reloaded.delete(&g1.id);
        let again = GrantStore::new(Some(path));
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        let store = GrantStore::new(None);
        let a = store.add("p", "t", "c", Duration::from_secs(60));
        let b = store.add("p", "t", "c", Duration::from_secs(60));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
