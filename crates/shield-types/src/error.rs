//! Error types shared across all Plasma Shield crates.

/// Errors that can occur across the shield runtime.
///
/// Each variant corresponds to a different subsystem: rule loading and
/// compilation, the fleet registry, the bastion, or configuration.
#[derive(Debug, thiserror::Error)]
pub enum ShieldError {
    /// A rule carries a pattern that does not compile.
    #[error("invalid pattern in rule '{rule_id}': {message}")]
    Pattern { rule_id: String, message: String },

    /// The rules document is not valid YAML or violates the schema.
    #[error("invalid rules YAML: {0}")]
    Yaml(String),

    /// Reload was requested before any load from a path.
    #[error("no rules path recorded; load rules from a file first")]
    NoPath,

    /// Underlying filesystem failure while loading or persisting state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fleet registry index violation (duplicate IP, unknown tenant, ...).
    #[error("registry error: {0}")]
    Registry(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Grant store failure or an expired/absent grant.
    #[error("grant error: {0}")]
    Grant(String),

    /// SSH certificate issuance or validation failure.
    #[error("certificate error: {0}")]
    Certificate(String),
}
