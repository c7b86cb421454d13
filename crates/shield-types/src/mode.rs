//! Operating modes for the shield data path.

use serde::{Deserialize, Serialize};

/// The operating mode applied to an agent's traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Normal operation: block requests that match a blocking rule.
    Enforce,
    /// Log everything but never block (testing and rollout).
    Audit,
    /// Block all traffic regardless of rules (emergency).
    Lockdown,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Enforce
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Enforce => write!(f, "enforce"),
            Mode::Audit => write!(f, "audit"),
            Mode::Lockdown => write!(f, "lockdown"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enforce" => Ok(Mode::Enforce),
            "audit" => Ok(Mode::Audit),
            "lockdown" => Ok(Mode::Lockdown),
            other => Err(crate::ShieldError::Config(format!(
                "unknown mode '{other}' (use enforce, audit, or lockdown)"
            ))),
        }
    }
}
