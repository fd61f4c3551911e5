//! Error types for hierarchical agent control

use thiserror::Error;

/// Result type for agent-control operations
pub type Result<T> = std::result::Result<T, HrlError>;

/// Agent-control error types
#[derive(Debug, Error)]
pub enum HrlError {
    /// A protocol invariant was broken; the episode cannot continue
    #[error("Invariant violation in {agent}: {detail}")]
    InvariantViolation { agent: String, detail: String },

    /// Action outside the agent's declared action space
    #[error("Unknown action {action} for agent {agent}")]
    UnknownAction { agent: String, action: usize },

    /// Agent name not present in the hierarchy
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Decision maker failure (construction, poisoned lock, worker gone)
    #[error("Decision maker error: {0}")]
    DecisionMaker(String),

    /// Environment failure
    #[error("Environment error: {0}")]
    Environment(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HrlError {
    /// Build an invariant violation for the named agent
    pub fn invariant(agent: impl Into<String>, detail: impl Into<String>) -> Self {
        HrlError::InvariantViolation {
            agent: agent.into(),
            detail: detail.into(),
        }
    }

    /// Build an unknown-action error for the named agent
    pub fn unknown_action(agent: impl Into<String>, action: usize) -> Self {
        HrlError::UnknownAction {
            agent: agent.into(),
            action,
        }
    }

    /// Whether this error must halt the run rather than just the current call
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HrlError::InvariantViolation { .. } | HrlError::UnknownAction { .. }
        )
    }
}

impl From<serde_json::Error> for HrlError {
    fn from(err: serde_json::Error) -> Self {
        HrlError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for HrlError {
    fn from(err: std::io::Error) -> Self {
        HrlError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HrlError::invariant("battle_mngr", "empty legal set").is_fatal());
        assert!(HrlError::unknown_action("trainer", 9).is_fatal());
        assert!(!HrlError::Config("bad".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = HrlError::unknown_action("army_attack", 42);
        assert_eq!(err.to_string(), "Unknown action 42 for agent army_attack");
    }
}
