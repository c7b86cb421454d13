//! Tier-aware rule evaluation with atomic hot reload.
//!
//! The engine owns one generation of compiled rules behind a reader-writer
//! lock. Compilation happens outside the lock; installing a new generation
//! swaps a single `Arc`, so concurrent evaluations always observe a
//! consistent ruleset.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use shield_types::ShieldError;

use crate::matcher::CompiledRule;
use crate::schema::{Rule, RuleAction, RuleSet};

/// The outcome of evaluating one domain or command against the ruleset.
#[derive(Debug, Clone)]
pub struct RuleDecision {
    pub allowed: bool,
    /// The first rule that matched, if any.
    pub rule: Option<Rule>,
    pub reason: String,
}

struct EngineState {
    compiled: Arc<Vec<CompiledRule>>,
    path: Option<PathBuf>,
}

/// Evaluates traffic against a hot-reloadable, ordered ruleset.
pub struct RuleEngine {
    state: RwLock<EngineState>,
    default_action: RuleAction,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// An empty engine whose default action is allow.
    pub fn new() -> Self {
        Self::with_default_action(RuleAction::Allow)
    }

    /// An empty engine with an explicit default action for unmatched traffic.
    pub fn with_default_action(default_action: RuleAction) -> Self {
        Self {
            state: RwLock::new(EngineState {
                compiled: Arc::new(Vec::new()),
                path: None,
            }),
            default_action,
        }
    }

    /// Parse and install a ruleset from raw YAML bytes. All-or-nothing: a
    /// parse or compile failure leaves the current generation in place.
    pub fn load_from_bytes(&self, data: &[u8]) -> Result<(), ShieldError> {
        let set: RuleSet =
            serde_yaml::from_slice(data).map_err(|e| ShieldError::Yaml(e.to_string()))?;
        self.install(set)
    }

    /// Load a ruleset from a YAML file and remember the path for `reload`.
    pub fn load_from_path(&self, path: &Path) -> Result<(), ShieldError> {
        let data = std::fs::read(path)?;
        let set: RuleSet =
            serde_yaml::from_slice(&data).map_err(|e| ShieldError::Yaml(e.to_string()))?;
        let compiled = compile_set(set)?;
        let mut state = self.write();
        state.compiled = Arc::new(compiled);
        state.path = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), rules = state.compiled.len(), "rules loaded");
        Ok(())
    }

    /// Compile and atomically install an in-memory ruleset.
    pub fn install(&self, set: RuleSet) -> Result<(), ShieldError> {
        let compiled = compile_set(set)?;
        let count = compiled.len();
        self.write().compiled = Arc::new(compiled);
        tracing::debug!(rules = count, "ruleset installed");
        Ok(())
    }

    /// Repeat the last `load_from_path`. Fails if no file was ever loaded.
    pub fn reload(&self) -> Result<(), ShieldError> {
        let path = self.read().path.clone().ok_or(ShieldError::NoPath)?;
        self.load_from_path(&path)
    }

    /// Evaluate a domain for the given tier.
    pub fn check_domain(&self, domain: &str, tier: &str) -> RuleDecision {
        self.evaluate(tier, |cr| cr.matches_domain(domain))
    }

    /// Evaluate a command line for the given tier.
    pub fn check_command(&self, command: &str, tier: &str) -> RuleDecision {
        self.evaluate(tier, |cr| cr.matches_command(command))
    }

    /// Number of rules in the current generation.
    pub fn rule_count(&self) -> usize {
        self.read().compiled.len()
    }

    /// Path of the last file load, if any.
    pub fn rules_path(&self) -> Option<PathBuf> {
        self.read().path.clone()
    }

    /// Snapshot copy of the current rules in declared order.
    pub fn rules(&self) -> Vec<Rule> {
        self.read().compiled.iter().map(|cr| cr.rule.clone()).collect()
    }

    /// Serialize the current ruleset back to YAML.
    pub fn save_to_string(&self) -> Result<String, ShieldError> {
        let set = RuleSet { rules: self.rules() };
        serde_yaml::to_string(&set).map_err(|e| ShieldError::Yaml(e.to_string()))
    }

    /// The action applied when no rule matches.
    pub fn default_action(&self) -> RuleAction {
        self.default_action
    }

    fn evaluate(&self, tier: &str, matches: impl Fn(&CompiledRule) -> bool) -> RuleDecision {
        // Clone the Arc under the read lock, evaluate outside it.
        let compiled = Arc::clone(&self.read().compiled);

        for cr in compiled.iter() {
            let rule = &cr.rule;
            if !rule.enabled || !rule.applies_to_tier(tier) || !matches(cr) {
                continue;
            }
            let reason = match rule.action {
                RuleAction::Block => describe(rule, "blocked"),
                RuleAction::Allow => describe(rule, "allowed"),
            };
            return RuleDecision {
                allowed: rule.action == RuleAction::Allow,
                rule: Some(rule.clone()),
                reason,
            };
        }

        match self.default_action {
            RuleAction::Allow => RuleDecision {
                allowed: true,
                rule: None,
                reason: String::new(),
            },
            RuleAction::Block => RuleDecision {
                allowed: false,
                rule: None,
                reason: "blocked by default policy".into(),
            },
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn describe(rule: &Rule, verb: &str) -> String {
    match rule.description.as_deref() {
        Some(desc) if !desc.is_empty() => format!("{verb} by rule {}: {desc}", rule.id),
        _ => format!("{verb} by rule {}", rule.id),
    }
}

fn compile_set(set: RuleSet) -> Result<Vec<CompiledRule>, ShieldError> {
    set.rules.into_iter().map(CompiledRule::compile).collect()
}
