//! Observations: the outcome of executing a step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Parameters;
use crate::Error;

/// Structured error attached to a failed observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationError {
    /// Short title
    pub title: String,
    /// Human-readable message
    pub message: String,
}

/// Result of one step attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Summary text shown to observers
    pub summary: String,
    /// Structured payload
    #[serde(default)]
    pub payload: Parameters,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Error details for failed attempts
    #[serde(default)]
    pub error: Option<ObservationError>,
}

impl Observation {
    /// Successful observation with the given summary.
    #[must_use]
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            payload: Parameters::new(),
            success: true,
            error: None,
        }
    }

    /// Failed observation with a title and message.
    #[must_use]
    pub fn failure(title: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            summary: message.clone(),
            payload: Parameters::new(),
            success: false,
            error: Some(ObservationError {
                title: title.into(),
                message,
            }),
        }
    }

    /// Failed observation describing `error`.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::failure(error.title(), error.to_string())
    }

    /// Adds a payload entry.
    #[must_use]
    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    /// String payload lookup.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_error() {
        let observation = Observation::failure("Capability error", "model offline");
        assert!(!observation.success);
        assert_eq!(observation.summary, "model offline");
        assert_eq!(
            observation.error.as_ref().map(|error| error.title.as_str()),
            Some("Capability error")
        );
    }

    #[test]
    fn test_from_error_uses_error_title() {
        let observation = Observation::from_error(&Error::Timeout(5));
        assert_eq!(
            observation.error.map(|error| error.title),
            Some("Timed out".to_owned())
        );
    }

    #[test]
    fn test_payload_lookup() {
        let observation = Observation::success("done").with_payload("completion", "hello");
        assert_eq!(observation.payload_str("completion"), Some("hello"));
        assert_eq!(observation.payload_str("missing"), None);
    }
}
