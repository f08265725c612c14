use std::time::Duration;
use thiserror::Error;

/// Main error type for the monitor
#[derive(Error, Debug)]
pub enum MedicError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // Metrics errors
    #[error("Metric unavailable: {0}")]
    MetricUnavailable(String),

    // Service registry errors
    #[error("Unknown service: {0}")]
    UnknownService(String),

    // Recovery errors
    #[error("Recovery strategy {strategy} failed: {reason}")]
    Strategy { strategy: String, reason: String },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Failure event not in incident history: {0}")]
    UnknownFailure(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MedicError
pub type Result<T> = std::result::Result<T, MedicError>;

impl MedicError {
    /// Shorthand for a strategy failure
    pub fn strategy(strategy: &str, reason: impl Into<String>) -> Self {
        MedicError::Strategy {
            strategy: strategy.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_error_display() {
        let err = MedicError::strategy("service_restart", "no restart command configured");
        let text = err.to_string();
        assert!(text.contains("service_restart"));
        assert!(text.contains("no restart command"));
    }

    #[test]
    fn test_timeout_display() {
        let err = MedicError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Operation timed out after 3s");
    }
}
