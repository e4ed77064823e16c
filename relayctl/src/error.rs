//! Error handling module for the relayctl CLI.
//!
//! Wraps the failures of every layer the CLI touches: the config file, the
//! filesystem, report serialization and the relay runtime itself.

use relay_core::RelayError;
use thiserror::Error;

/// Main error type for the relayctl CLI application.
#[derive(Error, Debug)]
pub enum RelayctlError {
    /// Configuration missing, unreadable or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error when IO operations fail.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for the expected schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Error when JSON serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The relay runtime refused an operation.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RelayError),

    /// A simulation finished but the consumer saw something other than
    /// what the producers recorded.
    #[error("Verification failed: {0}")]
    Verification(String),
}

/// Result type alias using RelayctlError.
pub type Result<T> = std::result::Result<T, RelayctlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::IsolateId;

    #[test]
    fn test_config_error_display() {
        let err = RelayctlError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err: RelayctlError = RelayError::UnknownIsolate(IsolateId::new(3)).into();
        assert!(matches!(err, RelayctlError::Runtime(_)));
        assert!(err.to_string().starts_with("Runtime error: "));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse = toml::from_str::<toml::Value>("not = [valid");
        let err: RelayctlError = parse.unwrap_err().into();
        assert!(matches!(err, RelayctlError::Toml(_)));
    }

    #[test]
    fn test_verification_error_display() {
        let err = RelayctlError::Verification("isolate#1 lost 2 commands".to_string());
        assert_eq!(
            err.to_string(),
            "Verification failed: isolate#1 lost 2 commands"
        );
    }
}
