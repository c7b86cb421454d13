//! Fleet vocabulary: tenants, agents, tiers, and isolation modes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tier with a built-in exemption from blanket block rules.
pub const TIER_COMMODORE: &str = "commodore";
/// Tier for agents trusted to coordinate others.
pub const TIER_CAPTAIN: &str = "captain";
/// Default tier for ordinary agents.
pub const TIER_CREW: &str = "crew";

/// Intra-tenant communication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    /// Agents cannot see or reach each other.
    Isolated,
    /// Agents within the tenant can enumerate and reach each other.
    Fleet,
}

impl Default for FleetMode {
    fn default() -> Self {
        FleetMode::Isolated
    }
}

impl std::fmt::Display for FleetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FleetMode::Isolated => write!(f, "isolated"),
            FleetMode::Fleet => write!(f, "fleet"),
        }
    }
}

impl std::str::FromStr for FleetMode {
    type Err = crate::ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(FleetMode::Isolated),
            "fleet" => Ok(FleetMode::Fleet),
            other => Err(crate::ShieldError::Config(format!(
                "unknown fleet mode '{other}' (use isolated or fleet)"
            ))),
        }
    }
}

/// An agent registered with the shield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Agent {
    /// The agent's tier, defaulting to crew when none is recorded.
    pub fn tier_or_default(&self) -> &str {
        match self.tier.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => TIER_CREW,
        }
    }
}

/// A unit of isolation owning a set of agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub mode: FleetMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captain_name: Option<String>,
    #[serde(default)]
    pub agents: HashMap<String, Agent>,
}

impl Tenant {
    /// A fresh tenant in the default isolated mode.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: FleetMode::Isolated,
            captain_name: None,
            agents: HashMap::new(),
        }
    }
}
