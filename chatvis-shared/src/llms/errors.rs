//! # LLM Error Types
//!
//! Failures of the completion call. Every variant is treated as transient by the
//! dispatcher: the unseen window stays unacknowledged and is retried on the next trigger.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for LLM operations
pub type LLMResult<T> = Result<T, LLMError>;

/// Error type for completion calls
#[derive(Error, Debug)]
pub enum LLMError {
    /// The endpoint did not answer in time
    #[error("Operation timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// The endpoint could not be reached or answered with an error status
    #[error("Completion endpoint unreachable: {reason}")]
    Unreachable { reason: String },

    /// The endpoint answered with a body none of the known shapes match
    #[error("Invalid completion response: {details}")]
    InvalidResponse { details: String },

    /// The endpoint answered but produced no text
    #[error("Completion response was empty")]
    EmptyResponse,

    /// Client could not be built from its configuration
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfiguration { field: String, message: String },
}

impl LLMError {
    /// Timeout after `elapsed`, kept at millisecond precision.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            millis: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a new unreachable error
    pub fn unreachable<T: Into<String>>(reason: T) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }

    /// Create a new invalid response error
    pub fn invalid_response<T: Into<String>>(details: T) -> Self {
        Self::InvalidResponse {
            details: details.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::EmptyResponse => "empty_response",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
        }
    }
}

impl From<serde_json::Error> for LLMError {
    fn from(error: serde_json::Error) -> Self {
        Self::invalid_response(error.to_string())
    }
}
