//! Declarative rule schema and its YAML representation.

use serde::{Deserialize, Serialize};

use shield_types::TIER_COMMODORE;

/// What a matching rule does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Allow,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Block => write!(f, "block"),
            RuleAction::Allow => write!(f, "allow"),
        }
    }
}

/// A single declarative filtering rule.
///
/// A rule carries at most one command pattern (glob) or one domain pattern.
/// A rule with neither is inert. `tiers` limits which agent tiers the rule
/// applies to; an empty list means all tiers, except that blanket block
/// rules exempt the commodore tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Whether this rule participates in evaluation for the given tier.
    ///
    /// An empty caller tier skips tier filtering entirely (callers that
    /// predate tier resolution). A non-empty `tiers` list is a membership
    /// test. With no tiers listed, the rule applies to everyone except that
    /// block rules exempt commodore unless commodore is named explicitly.
    pub fn applies_to_tier(&self, tier: &str) -> bool {
        if tier.is_empty() {
            return true;
        }
        if !self.tiers.is_empty() {
            return self.tiers.iter().any(|t| t == tier);
        }
        !(self.action == RuleAction::Block && tier == TIER_COMMODORE)
    }
}

/// An ordered collection of rules, as loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: RuleAction, tiers: &[&str]) -> Rule {
        Rule {
            id: "r".into(),
            pattern: None,
            domain: None,
            action,
            description: None,
            tiers: tiers.iter().map(|s| s.to_string()).collect(),
            enabled: true,
        }
    }

    #[test]
    fn no_tiers_applies_to_crew() {
        assert!(rule(RuleAction::Block, &[]).applies_to_tier("crew"));
    }

    #[test]
    fn no_tiers_commodore_exempt_from_block() {
        assert!(!rule(RuleAction::Block, &[]).applies_to_tier("commodore"));
    }

    #[test]
    fn no_tiers_commodore_gets_allow_rules() {
        assert!(rule(RuleAction::Allow, &[]).applies_to_tier("commodore"));
    }

    #[test]
    fn explicit_tier_membership() {
        let r = rule(RuleAction::Block, &["crew"]);
        assert!(r.applies_to_tier("crew"));
        assert!(!r.applies_to_tier("captain"));

        let r = rule(RuleAction::Block, &["crew", "captain"]);
        assert!(r.applies_to_tier("captain"));
    }

    #[test]
    fn explicit_commodore_overrides_exemption() {
        let r = rule(RuleAction::Block, &["crew", "commodore"]);
        assert!(r.applies_to_tier("commodore"));

        let r = rule(RuleAction::Block, &["crew", "captain"]);
        assert!(!r.applies_to_tier("commodore"));
    }

    #[test]
    fn empty_tier_skips_filtering() {
        assert!(rule(RuleAction::Block, &["crew"]).applies_to_tier(""));
        assert!(rule(RuleAction::Block, &[]).applies_to_tier(""));
    }

    #[test]
    fn enabled_defaults_to_true() {
        let yaml = "id: r1\ndomain: example.com\naction: block\n";
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.enabled);
    }

    #[test]
    fn ruleset_yaml_roundtrip() {
        let yaml = concat!(
            "rules:\n",
            "- id: block-pastebin\n",
            "  domain: pastebin.com\n",
            "  action: block\n",
            "  description: Block pastebin\n",
            "  enabled: true\n",
        );
        let set: RuleSet = serde_yaml::from_str(yaml).unwrap();
        let out = serde_yaml::to_string(&set).unwrap();
        let back: RuleSet = serde_yaml::from_str(&out).unwrap();
        assert_eq!(back, set);
    }
}
