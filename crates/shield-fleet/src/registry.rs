//! The in-memory tenant/agent registry.

use std::collections::HashMap;
use std::sync::RwLock;

use shield_types::{Agent, FleetMode, ShieldError, Tenant};

/// Resolution of a source IP to a registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub tier: String,
}

struct RegistryState {
    tenants: HashMap<String, Tenant>,
    agent_to_tenant: HashMap<String, String>,
    ip_to_agent: HashMap<String, Agent>,
}

/// Registry of tenants and their agents with IP and id secondary indices.
pub struct FleetRegistry {
    state: RwLock<RegistryState>,
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                tenants: HashMap::new(),
                agent_to_tenant: HashMap::new(),
                ip_to_agent: HashMap::new(),
            }),
        }
    }

    /// Create a tenant in the default isolated mode. Re-creating an existing
    /// tenant is a no-op.
    pub fn create_tenant(&self, tenant_id: &str) {
        let mut state = self.write();
        state
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id));
    }

    /// Set a tenant's isolation mode, creating the tenant if needed.
    pub fn set_isolation_mode(&self, tenant_id: &str, mode: FleetMode) {
        let mut state = self.write();
        state
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id))
            .mode = mode;
    }

    /// A tenant's isolation mode; unknown tenants are isolated.
    pub fn isolation_mode(&self, tenant_id: &str) -> FleetMode {
        self.read()
            .tenants
            .get(tenant_id)
            .map(|t| t.mode)
            .unwrap_or(FleetMode::Isolated)
    }

    /// Set the display name used to mask reverse-proxied requests.
    pub fn set_captain_name(&self, tenant_id: &str, name: &str) {
        let mut state = self.write();
        state
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id))
            .captain_name = Some(name.to_string());
    }

    /// The tenant's captain display name, if set.
    pub fn captain_name(&self, tenant_id: &str) -> Option<String> {
        self.read()
            .tenants
            .get(tenant_id)
            .and_then(|t| t.captain_name.clone())
    }

    /// Copy of a tenant's record.
    pub fn get_tenant(&self, tenant_id: &str) -> Option<Tenant> {
        self.read().tenants.get(tenant_id).cloned()
    }

    /// Register an agent under a tenant, keeping all three indices
    /// consistent.
    ///
    /// Re-adding an agent id moves it: the previous registration (and its IP
    /// index entry) is removed first. An IP already owned by a different
    /// agent is an error.
    pub fn add_agent(&self, tenant_id: &str, agent: Agent) -> Result<(), ShieldError> {
        let mut state = self.write();

        if let Some(ip) = agent.ip.as_deref() {
            if let Some(existing) = state.ip_to_agent.get(ip) {
                if existing.id != agent.id {
                    return Err(ShieldError::Registry(format!(
                        "ip {ip} already registered to agent '{}'",
                        existing.id
                    )));
                }
            }
        }

        // Drop any previous registration of this agent id.
        if let Some(prev_tenant) = state.agent_to_tenant.remove(&agent.id) {
            if let Some(tenant) = state.tenants.get_mut(&prev_tenant) {
                if let Some(prev) = tenant.agents.remove(&agent.id) {
                    if let Some(prev_ip) = prev.ip.as_deref() {
                        state.ip_to_agent.remove(prev_ip);
                    }
                }
            }
        }

        let tenant = state
            .tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Tenant::new(tenant_id));
        tenant.agents.insert(agent.id.clone(), agent.clone());
        state
            .agent_to_tenant
            .insert(agent.id.clone(), tenant_id.to_string());
        if let Some(ip) = agent.ip.clone() {
            state.ip_to_agent.insert(ip, agent);
        }
        Ok(())
    }

    /// Remove an agent from a tenant's fleet, clearing its index entries.
    pub fn remove_agent(&self, tenant_id: &str, agent_id: &str) {
        let mut state = self.write();
        let Some(tenant) = state.tenants.get_mut(tenant_id) else {
            return;
        };
        if let Some(agent) = tenant.agents.remove(agent_id) {
            if let Some(ip) = agent.ip.as_deref() {
                state.ip_to_agent.remove(ip);
            }
        }
        state.agent_to_tenant.remove(agent_id);
    }

    /// Resolve a source IP to a registered agent and its tier
    /// (defaulting to crew).
    pub fn validate_agent_ip(&self, ip: &str) -> Option<AgentIdentity> {
        let state = self.read();
        let agent = state.ip_to_agent.get(ip)?;
        Some(AgentIdentity {
            agent_id: agent.id.clone(),
            tier: agent.tier_or_default().to_string(),
        })
    }

    /// The tenant owning an agent, if any.
    pub fn tenant_for_agent(&self, agent_id: &str) -> Option<String> {
        self.read().agent_to_tenant.get(agent_id).cloned()
    }

    /// An agent's tier (crew when unset), if the agent is registered.
    pub fn agent_tier(&self, agent_id: &str) -> Option<String> {
        let state = self.read();
        let tenant_id = state.agent_to_tenant.get(agent_id)?;
        let agent = state.tenants.get(tenant_id)?.agents.get(agent_id)?;
        Some(agent.tier_or_default().to_string())
    }

    /// All agents in a tenant's fleet. Empty for isolated or unknown
    /// tenants: in isolated mode agents must not be enumerable.
    pub fn get_agents(&self, tenant_id: &str) -> Vec<Agent> {
        let state = self.read();
        let Some(tenant) = state.tenants.get(tenant_id) else {
            return Vec::new();
        };
        if tenant.mode == FleetMode::Isolated {
            return Vec::new();
        }
        tenant.agents.values().cloned().collect()
    }

    /// The agents visible to one agent: its tenant peers in fleet mode,
    /// nothing otherwise. Self is always excluded.
    pub fn get_agents_for_agent(&self, agent_id: &str) -> Vec<Agent> {
        let state = self.read();
        let Some(tenant_id) = state.agent_to_tenant.get(agent_id) else {
            return Vec::new();
        };
        let Some(tenant) = state.tenants.get(tenant_id) else {
            return Vec::new();
        };
        if tenant.mode == FleetMode::Isolated {
            return Vec::new();
        }
        tenant
            .agents
            .values()
            .filter(|a| a.id != agent_id)
            .cloned()
            .collect()
    }

    /// Two agents can communicate iff they share a tenant and that tenant
    /// is in fleet mode.
    pub fn can_communicate(&self, from_agent: &str, to_agent: &str) -> bool {
        let state = self.read();
        let (Some(from_tenant), Some(to_tenant)) = (
            state.agent_to_tenant.get(from_agent),
            state.agent_to_tenant.get(to_agent),
        ) else {
            return false;
        };
        if from_tenant != to_tenant {
            return false;
        }
        state
            .tenants
            .get(from_tenant)
            .map(|t| t.mode == FleetMode::Fleet)
            .unwrap_or(false)
    }

    /// All tenant ids.
    pub fn tenant_ids(&self) -> Vec<String> {
        self.read().tenants.keys().cloned().collect()
    }

    /// Every registered agent across all tenants (management plane view).
    pub fn all_agents(&self) -> Vec<Agent> {
        self.read()
            .tenants
            .values()
            .flat_map(|t| t.agents.values().cloned())
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
