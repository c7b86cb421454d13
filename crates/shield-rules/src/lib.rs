//! Rule engine for filtering agent traffic.
//!
//! Rules are declared in YAML, compiled to case-insensitive matchers, and
//! evaluated first-match-wins with tier awareness. The compiled ruleset can
//! be hot-reloaded atomically while evaluations run concurrently.

pub mod engine;
pub mod matcher;
pub mod schema;

pub use engine::{RuleDecision, RuleEngine};
pub use matcher::CompiledRule;
pub use schema::{Rule, RuleAction, RuleSet};
