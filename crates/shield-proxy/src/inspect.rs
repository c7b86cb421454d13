//! Request inspection: rule evaluation combined with the operating mode.

use std::sync::Arc;

use shield_mode::ModeManager;
use shield_rules::{RuleDecision, RuleEngine};
use shield_types::Mode;

/// The mode-aware outcome for one request.
#[derive(Debug, Clone)]
pub struct RequestVerdict {
    /// Whether the request must actually be refused.
    pub should_block: bool,
    /// Whether a blocking rule matched (audit mode may still let it pass).
    pub rule_matched: bool,
    pub reason: String,
    pub rule_id: Option<String>,
}

/// Combines the rule engine and mode manager into per-request verdicts.
pub struct Inspector {
    engine: Arc<RuleEngine>,
    modes: Arc<ModeManager>,
}

impl Inspector {
    pub fn new(engine: Arc<RuleEngine>, modes: Arc<ModeManager>) -> Self {
        Self { engine, modes }
    }

    /// Evaluate a host for an agent and fold in the effective mode.
    pub fn check_request(&self, agent_id: &str, tier: &str, host: &str) -> RequestVerdict {
        let decision = self.engine.check_domain(host, tier);
        let rule_matched = !decision.allowed;
        let should_block = self.modes.should_block(agent_id, rule_matched);
        let rule_id = decision.rule.map(|r| r.id);

        let reason = if rule_matched {
            decision.reason
        } else if should_block {
            // Lockdown blocks without any rule having matched.
            format!("blocked by {} mode", self.modes.agent_mode(agent_id))
        } else {
            String::new()
        };

        if rule_matched {
            let mode = self.modes.agent_mode(agent_id);
            if should_block {
                tracing::info!(mode = %mode, host, agent = agent_id, rule = ?rule_id, "blocking request");
            } else {
                tracing::info!(mode = %mode, host, agent = agent_id, rule = ?rule_id, "would block (audit)");
            }
        }

        RequestVerdict {
            should_block,
            rule_matched,
            reason,
            rule_id,
        }
    }

    /// Evaluate a command line against the command rules (no mode folding).
    pub fn check_command(&self, command: &str, tier: &str) -> RuleDecision {
        self.engine.check_command(command, tier)
    }

    /// Effective mode for an agent.
    pub fn mode(&self, agent_id: &str) -> Mode {
        self.modes.agent_mode(agent_id)
    }
}
