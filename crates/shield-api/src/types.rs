//! Wire types for the management plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shield_rules::{Rule, RuleAction};
use shield_types::{Grant, SessionEvent, TrafficEntry};

/// Lifecycle state of a managed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Paused,
    Killed,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Active => write!(f, "active"),
            AgentState::Paused => write!(f, "paused"),
            AgentState::Killed => write!(f, "killed"),
        }
    }
}

/// Management-plane view of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub status: AgentState,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: DateTime<Utc>,
    pub agent_count: usize,
    pub rule_count: usize,
    pub requests_total: u64,
    pub blocked_total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentListResponse {
    pub agents: Vec<AgentRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentActionResponse {
    pub id: String,
    pub status: AgentState,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleListResponse {
    pub rules: Vec<Rule>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    pub action: RuleAction,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tiers: Vec<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRuleResponse {
    pub rule: Rule,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRuleResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogListResponse {
    pub logs: Vec<TrafficEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantListResponse {
    pub grants: Vec<Grant>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateGrantRequest {
    pub principal: String,
    pub target: String,
    /// Humantime duration, e.g. "30m" or "24h".
    pub duration: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGrantResponse {
    pub grant: Grant,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteGrantResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionEvent>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecCheckRequest {
    pub command: String,
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecCheckResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}
