//! Error types for the agent daemon.

use std::path::PathBuf;
use thiserror::Error;
use vswitch_orch_common::ConfigError;

/// Agent daemon errors.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent configuration file could not be loaded.
    #[error("failed to load config {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// The agent configuration is inconsistent.
    #[error("invalid agent config: {0}")]
    InvalidAgentConfig(String),

    /// The desired state document could not be read.
    #[error("failed to load desired state {path}: {reason}")]
    DesiredLoad { path: PathBuf, reason: String },

    /// Initialization failed; the agent must not start.
    #[error("initialization failed: {0}")]
    Init(#[source] ConfigError),

    /// A configurator operation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::InvalidAgentConfig("interval_ms must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid agent config: interval_ms must be > 0"
        );
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err: AgentError = ConfigError::not_found("interface", "loop1").into();
        assert_eq!(err.to_string(), "interface not found: loop1");
    }
}
