//! Error types for rule tree loading and validation.

/// Errors raised while loading a route tree. Evaluation itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// YAML parse/deserialization error, including invalid patterns.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A match rule names a destination that is not declared.
    #[error("rule '{rule}' routes to unknown receiver '{receiver}'")]
    UnknownReceiver { rule: String, receiver: String },
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
