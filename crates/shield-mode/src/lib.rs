//! Operating mode management for the shield data path.
//!
//! One global mode plus per-agent overrides. The effective mode for an agent
//! is its override if present, else the global mode; changing the global mode
//! never touches explicit overrides.

use std::collections::HashMap;
use std::sync::RwLock;

use shield_types::Mode;

struct ModeState {
    global: Mode,
    agents: HashMap<String, Mode>,
}

/// Tracks the global operating mode and per-agent overrides.
pub struct ModeManager {
    state: RwLock<ModeState>,
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeManager {
    /// A manager starting in enforce mode with no overrides.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ModeState {
                global: Mode::Enforce,
                agents: HashMap::new(),
            }),
        }
    }

    /// The current global mode.
    pub fn global_mode(&self) -> Mode {
        self.read().global
    }

    /// Replace the global mode. Agents with an explicit override keep it.
    pub fn set_global_mode(&self, mode: Mode) {
        self.write().global = mode;
    }

    /// Effective mode for an agent: its override if set, else global.
    pub fn agent_mode(&self, agent_id: &str) -> Mode {
        let state = self.read();
        state.agents.get(agent_id).copied().unwrap_or(state.global)
    }

    /// Install a per-agent override.
    pub fn set_agent_mode(&self, agent_id: &str, mode: Mode) {
        self.write().agents.insert(agent_id.to_string(), mode);
    }

    /// Remove an agent's override, reverting it to the global mode.
    pub fn clear_agent_mode(&self, agent_id: &str) {
        self.write().agents.remove(agent_id);
    }

    /// Snapshot copy of all per-agent overrides.
    pub fn all_agent_modes(&self) -> HashMap<String, Mode> {
        self.read().agents.clone()
    }

    /// The mode-aware blocking decision.
    ///
    /// Audit never blocks, lockdown always blocks, enforce blocks exactly
    /// when a rule matched.
    pub fn should_block(&self, agent_id: &str, rule_matched: bool) -> bool {
        match self.agent_mode(agent_id) {
            Mode::Audit => false,
            Mode::Lockdown => true,
            Mode::Enforce => rule_matched,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ModeState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ModeState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
