//! Error types for the saga audit plugin.
//!
//! Most failures inside the plugin are recorded and swallowed so that audit
//! delivery never interferes with business message processing.  The variants
//! that do surface are configuration problems and the startup reachability
//! probe.

use thiserror::Error;

/// The unified error type for the saga audit crates.
#[derive(Debug, Clone, Error)]
pub enum SagaAuditError {
    /// A required configuration value is missing or invalid.
    ///
    /// Raised while building the delivery backend; prevents the endpoint
    /// from starting.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A queue address could not be parsed.
    #[error("invalid destination address '{address}'")]
    InvalidAddress { address: String },

    /// A value could not be turned into a transportable payload.
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// The transport refused or failed to dispatch an operation.
    #[error("dispatch to '{destination}' failed: {reason}")]
    DispatchFailed { destination: String, reason: String },

    /// A dispatch did not complete within the configured local timeout.
    #[error("dispatch to '{destination}' timed out after {timeout_ms} ms")]
    DispatchTimedOut { destination: String, timeout_ms: u128 },

    /// The audit backend could not be reached during startup.
    #[error("audit backend '{address}' is unreachable: {reason}")]
    BackendUnreachable { address: String, reason: String },

    /// The wrapped message handler failed.  Propagated unchanged through the
    /// interceptors.
    #[error("message handler failed: {reason}")]
    HandlerFailed { reason: String },
}

impl From<serde_json::Error> for SagaAuditError {
    fn from(e: serde_json::Error) -> Self {
        SagaAuditError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the saga audit crates.
pub type SagaAuditResult<T> = Result<T, SagaAuditError>;
