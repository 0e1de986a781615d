//! # saga-audit-backend
//!
//! Best-effort delivery of audit records to the audit backend.
//!
//! ## Overview
//!
//! - [`SagaAuditSettings`] holds the endpoint settings, loaded from TOML or
//!   built in code.
//! - [`resolve_backend_address`] picks the backend queue: explicit setting
//!   first, then inferred from the error or audit queue's machine.
//! - [`DeliveryBackend`] serializes each record, dispatches it as a unicast
//!   message, and reports outcomes to a
//!   [`RepeatedFailuresOverTimeCircuitBreaker`] that raises a critical error
//!   when failures persist.
//! - [`memory`] has in-memory collaborators for tests and the demo.

pub mod address;
pub mod backend;
pub mod breaker;
pub mod config;
pub mod memory;

pub use address::{resolve_backend_address, QueueAddress, BACKEND_SERVICE_NAME};
pub use backend::{DeliveryBackend, CIRCUIT_BREAKER_NAME};
pub use breaker::{CircuitState, RepeatedFailuresOverTimeCircuitBreaker, TripCallback};
pub use config::{
    SagaAuditSettings, DEFAULT_CIRCUIT_BREAKER_WINDOW_SECS, DEFAULT_DISPATCH_TIMEOUT_SECS,
};
pub use memory::{InMemoryDispatcher, LoggingCriticalError, RecordingCriticalError};

// ── Tests ─────────────────────────────────────────────────────────────────────
