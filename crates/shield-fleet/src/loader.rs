//! Fleet configuration loading from YAML with `${ENV_VAR}` substitution.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use shield_types::{Agent, FleetMode, ShieldError};

use crate::registry::FleetRegistry;

/// A tenant block in the fleet config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default)]
    pub mode: FleetMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captain_name: Option<String>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// An auth token mapping a bearer string to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub token: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The fleet configuration document: tenants plus reverse-proxy tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

impl FleetConfig {
    /// Load a fleet config file, substituting `${VAR}` references from the
    /// environment. Unset variables are left literal.
    pub fn load(path: &Path) -> Result<Self, ShieldError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse a fleet config document with environment substitution.
    pub fn parse(raw: &str) -> Result<Self, ShieldError> {
        let substituted = env_var_regex().replace_all(raw, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(value) if !value.is_empty() => value,
                _ => caps[0].to_string(),
            }
        });
        serde_yaml::from_str(&substituted).map_err(|e| ShieldError::Config(e.to_string()))
    }

    /// Populate a registry from this config. Returns the token pairs for the
    /// reverse proxy to register.
    pub fn apply(&self, registry: &FleetRegistry) -> Result<Vec<TokenConfig>, ShieldError> {
        for tenant in &self.tenants {
            registry.create_tenant(&tenant.id);
            registry.set_isolation_mode(&tenant.id, tenant.mode);
            if let Some(name) = tenant.captain_name.as_deref() {
                registry.set_captain_name(&tenant.id, name);
            }
            for agent in &tenant.agents {
                registry.add_agent(&tenant.id, agent.clone())?;
                tracing::debug!(
                    tenant = %tenant.id,
                    agent = %agent.id,
                    tier = %agent.tier_or_default(),
                    "agent registered"
                );
            }
            tracing::info!(
                tenant = %tenant.id,
                mode = %tenant.mode,
                agents = tenant.agents.len(),
                "tenant loaded"
            );
        }
        Ok(self.tokens.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
tenants:
  - id: acme
    mode: fleet
    captain_name: "Chubes"
    agents:
      - id: sarai
        name: Sarai
        ip: 10.0.0.5
        tier: captain
      - id: deckhand
        name: Deckhand
        ip: 10.0.0.6
        webhook_url: "http://10.0.0.6:9000/hook"
  - id: lonely
    agents:
      - id: solo
        name: Solo
tokens:
  - token: acme-secret
    tenant_id: acme
    name: acme ops
"#;

    #[test]
    fn parse_and_apply() {
        let config = FleetConfig::parse(CONFIG).unwrap();
        let registry = FleetRegistry::new();
        let tokens = config.apply(&registry).unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, "acme-secret");
        assert_eq!(tokens[0].tenant_id, "acme");

        assert_eq!(registry.isolation_mode("acme"), FleetMode::Fleet);
        assert_eq!(registry.isolation_mode("lonely"), FleetMode::Isolated);
        assert_eq!(registry.captain_name("acme").as_deref(), Some("Chubes"));

        let ident = registry.validate_agent_ip("10.0.0.5").unwrap();
        assert_eq!(ident.agent_id, "sarai");
        assert_eq!(ident.tier, "captain");
        assert_eq!(registry.agent_tier("deckhand").as_deref(), Some("crew"));
    }

    #[test]
    fn env_substitution() {
        std::env::set_var("SHIELD_TEST_TOKEN_A1B2", "supersecret");
        let raw = concat!(
            "tokens:\n",
            "  - token: ${SHIELD_TEST_TOKEN_A1B2}\n",
            "    tenant_id: acme\n",
            "  - token: ${SHIELD_TEST_UNSET_VAR_A1B2}\n",
            "    tenant_id: other\n",
        );
        let config = FleetConfig::parse(raw).unwrap();
        assert_eq!(config.tokens[0].token, "supersecret");
        // Unset variables stay literal.
        assert_eq!(config.tokens[1].token, "${SHIELD_TEST_UNSET_VAR_A1B2}");
        std::env::remove_var("SHIELD_TEST_TOKEN_A1B2");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = FleetConfig::load(file.path()).unwrap();
        assert_eq!(config.tenants.len(), 2);
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let err = FleetConfig::parse("tenants: [oops").unwrap_err();
        assert!(matches!(err, ShieldError::Config(_)));
    }
}
