//! Management REST plane.
//!
//! JSON endpoints over the live components: status, agent lifecycle, rule
//! CRUD compiled straight into the running engine, traffic logs, bastion
//! grants and sessions, command checks, and mode/fleet management.
//! Optionally guarded by a bearer token compared in constant time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use shield_bastion::{GrantStore, SessionLogStore};
use shield_fleet::FleetRegistry;
use shield_mode::ModeManager;
use shield_proxy::TrafficLog;
use shield_rules::RuleEngine;
use shield_types::Agent;

pub mod handlers;
pub mod types;

pub use handlers::router;

use types::{AgentRecord, AgentState};

/// Shared state behind every management endpoint.
pub struct ApiContext {
    pub engine: Arc<RuleEngine>,
    pub modes: Arc<ModeManager>,
    pub registry: Arc<FleetRegistry>,
    pub traffic: Arc<TrafficLog>,
    pub grants: Arc<GrantStore>,
    pub sessions: Arc<SessionLogStore>,
    pub version: &'static str,
    started_at: DateTime<Utc>,
    agents: RwLock<HashMap<String, AgentRecord>>,
    auth_token: Option<String>,
}

impl ApiContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<RuleEngine>,
        modes: Arc<ModeManager>,
        registry: Arc<FleetRegistry>,
        traffic: Arc<TrafficLog>,
        grants: Arc<GrantStore>,
        sessions: Arc<SessionLogStore>,
        version: &'static str,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            engine,
            modes,
            registry,
            traffic,
            grants,
            sessions,
            version,
            started_at: Utc::now(),
            agents: RwLock::new(HashMap::new()),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }

    /// Track an agent on the management plane, initially active.
    pub fn register_agent(&self, agent: &Agent) {
        let now = Utc::now();
        let record = AgentRecord {
            id: agent.id.clone(),
            name: agent.name.clone(),
            ip: agent.ip.clone(),
            status: AgentState::Active,
            last_seen: now,
            created_at: now,
        };
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.id.clone(), record);
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub(crate) fn agents(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, AgentRecord>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn agents_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, AgentRecord>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }
}
