//! Bastion access grants and session events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-limited assertion that a principal may reach a target host.
///
/// Consumed by the bastion: certificate issuance requires a live grant, and
/// `direct-tcpip` channels are only opened when a live grant covers the
/// requested destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub principal: String,
    /// Agent id or `*` for any target.
    pub target: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Grant {
    /// A grant is live strictly before its expiry instant.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether this grant covers the requested target (exact or wildcard).
    pub fn covers_target(&self, requested: &str) -> bool {
        self.target == "*" || self.target == requested
    }
}

/// The kind of activity a session event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventKind {
    Connect,
    Disconnect,
    Command,
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEventKind::Connect => write!(f, "connect"),
            SessionEventKind::Disconnect => write!(f, "disconnect"),
            SessionEventKind::Command => write!(f, "command"),
        }
    }
}

/// A point record of bastion session activity.
///
/// `data` carries the session duration for disconnect events and the command
/// text for command events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub grant_id: String,
    pub principal: String,
    pub target: String,
    pub event: SessionEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant_expiring_in(minutes: i64) -> Grant {
        let now = Utc::now();
        Grant {
            id: "grant-1".into(),
            principal: "alice".into(),
            target: "agent-1".into(),
            expires_at: now + Duration::minutes(minutes),
            created_at: now,
            created_by: "cli".into(),
        }
    }

    #[test]
    fn grant_active_strictly_before_expiry() {
        let grant = grant_expiring_in(30);
        assert!(grant.is_active_at(grant.created_at));
        assert!(grant.is_active_at(grant.expires_at - Duration::seconds(1)));
        assert!(!grant.is_active_at(grant.expires_at));
        assert!(!grant.is_active_at(grant.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn grant_target_matching() {
        let mut grant = grant_expiring_in(5);
        assert!(grant.covers_target("agent-1"));
        assert!(!grant.covers_target("agent-2"));

        grant.target = "*".into();
        assert!(grant.covers_target("agent-2"));
    }

    #[test]
    fn session_event_json_shape() {
        let event = SessionEvent {
            session_id: "s1".into(),
            grant_id: "g1".into(),
            principal: "alice".into(),
            target: "10.0.0.5:22".into(),
            event: SessionEventKind::Disconnect,
            timestamp: Utc::now(),
            data: Some("42s".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"disconnect\""));
        assert!(json.contains("\"data\":\"42s\""));

        let connect = SessionEvent {
            event: SessionEventKind::Connect,
            data: None,
            ..event
        };
        let json = serde_json::to_string(&connect).unwrap();
        assert!(!json.contains("\"data\""));
    }
}
