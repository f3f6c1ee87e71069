//! Error types for the hivebus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all hivebus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Bus errors ---
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    // --- Validation errors ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Signal errors ---
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    // --- Runner errors ---
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors surfaced by a bus backend.
///
/// Empty reads are never errors; a backend that has nothing to deliver
/// returns an empty batch.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The transport failed (connection refused, broken pipe, backend down).
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A caller-supplied cursor could not be understood by the backend.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Envelope validation failures. Surfaced to the ingress caller before any
/// bus traffic is generated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown sender scheme: {0:?} (expected user:<id> or agent:<name>)")]
    BadSender(String),

    #[error("unknown recipient scheme: {0:?} (expected chat:<conversation_id> or agent:<name>)")]
    BadRecipient(String),

    #[error("unknown envelope type: {0:?} (expected \"message\" or \"control\")")]
    BadKind(String),

    #[error("message envelopes require non-empty content")]
    EmptyContent,
}

impl ValidationError {
    /// Stable machine-readable code for structured HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::BadSender(_) => "bad_sender",
            Self::BadRecipient(_) => "bad_recipient",
            Self::BadKind(_) => "bad_kind",
            Self::EmptyContent => "empty_content",
        }
    }
}

/// Signal policy and transport failures.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("topic {topic:?} is outside the allowed prefix {prefix:?}")]
    PolicyViolation { topic: String, prefix: String },

    #[error("signal payload is {size} bytes, cap is {cap}")]
    PayloadTooLarge { size: usize, cap: usize },

    #[error("invalid signal topic: {0}")]
    InvalidTopic(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors raised by a Runner implementation.
///
/// The Worker converts these into a synthetic error `Output` event and
/// acknowledges the inbound entry, so a failing runner never poisons the
/// consumer group.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("runner failed: {0}")]
    Failed(String),

    #[error("runner produced no terminal event within {timeout_secs}s")]
    MissingTerminal { timeout_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_displays_correctly() {
        let err = Error::Bus(BusError::Unavailable("connection refused".into()));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn validation_error_codes_are_stable() {
        assert_eq!(
            ValidationError::MissingField("conversation_id").code(),
            "missing_field"
        );
        assert_eq!(ValidationError::BadSender("x".into()).code(), "bad_sender");
        assert_eq!(
            ValidationError::BadRecipient("x".into()).code(),
            "bad_recipient"
        );
        assert_eq!(ValidationError::BadKind("x".into()).code(), "bad_kind");
    }

    #[test]
    fn signal_policy_error_names_topic_and_prefix() {
        let err = SignalError::PolicyViolation {
            topic: "chat:foo".into(),
            prefix: "signal:".into(),
        };
        assert!(err.to_string().contains("chat:foo"));
        assert!(err.to_string().contains("signal:"));
    }
}
