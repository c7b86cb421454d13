//! Traffic log records produced by the proxies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The final disposition of a proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficAction {
    /// Forwarded; no blocking rule matched.
    Allow,
    /// Refused by a rule (or lockdown mode).
    Block,
    /// A blocking rule matched but audit mode let the request through.
    Audit,
    /// Refused at admission: the source IP is not a registered agent.
    Reject,
}

impl std::fmt::Display for TrafficAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficAction::Allow => write!(f, "allow"),
            TrafficAction::Block => write!(f, "block"),
            TrafficAction::Audit => write!(f, "audit"),
            TrafficAction::Reject => write!(f, "reject"),
        }
    }
}

/// One logged proxy decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_token: Option<String>,
    pub domain: String,
    pub method: String,
    pub action: TrafficAction,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl TrafficEntry {
    /// A fresh entry stamped with the current time.
    pub fn now(domain: impl Into<String>, method: impl Into<String>, action: TrafficAction) -> Self {
        Self {
            timestamp: Utc::now(),
            source_ip: None,
            agent_id: None,
            agent_token: None,
            domain: domain.into(),
            method: method.into(),
            action,
            reason: String::new(),
        }
    }
}
