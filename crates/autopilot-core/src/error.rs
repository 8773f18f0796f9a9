use core::result::Result as CoreResult;
use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;
use toml::ser::Error as TomlSerializeError;

use crate::types::SessionId;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur while configuring or driving a session.
#[derive(Debug, Error)]
pub enum Error {
    /// A plugin name or parameter set could not be resolved. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A capability (language model, editor, context provider, I/O) failed.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A validator rejected an observation.
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// No session is known under the given identifier.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// An attempt or validator exceeded its time limit.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The session was cancelled while the operation was in flight.
    #[error("Cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// TOML serialization failed.
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] TomlSerializeError),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether the bounded-retry loop may consume this error.
    ///
    /// Capability, validation, timeout and I/O failures are retried; configuration
    /// problems, unknown sessions and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Capability(_) | Self::ValidationFailure(_) | Self::Timeout(_) | Self::Io(_)
        )
    }

    /// Returns `true` for configuration errors, which abort before any step runs.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Short title used when the error is surfaced as a failed observation.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Configuration error",
            Self::Capability(_) | Self::Io(_) => "Capability error",
            Self::ValidationFailure(_) => "Validation failed",
            Self::SessionNotFound(_) => "Session not found",
            Self::Timeout(_) => "Timed out",
            Self::Cancelled => "Cancelled",
            Self::Json(_) | Self::Toml(_) | Self::TomlSerialize(_) => "Serialization error",
            Self::Other(_) => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, from_str};
    use std::io;

    #[test]
    fn test_error_display() {
        let error1 = Error::Configuration("unknown policy 'unknown_policy'".to_owned());
        assert_eq!(
            error1.to_string(),
            "Configuration error: unknown policy 'unknown_policy'"
        );

        let error2 = Error::Timeout(250);
        assert_eq!(error2.to_string(), "Timeout after 250ms");

        let error3 = Error::SessionNotFound(SessionId::from_u128(7));
        assert!(error3.to_string().starts_with("Session not found: "));
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Capability("model offline".to_owned()).is_retryable());
        assert!(Error::ValidationFailure("pattern".to_owned()).is_retryable());
        assert!(Error::Timeout(10).is_retryable());

        assert!(!Error::Configuration("bad".to_owned()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::SessionNotFound(SessionId::new()).is_retryable());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_from_json() {
        let json_error = from_str::<JsonValue>("invalid json").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
        assert_eq!(error.title(), "Serialization error");
    }
}
