//! In-memory collaborators.
//!
//! `InMemoryDispatcher` stands in for a transport: it keeps every dispatched
//! operation in a `Vec` behind a `Mutex` and can be switched into a failing
//! mode to simulate an unreachable backend.  `RecordingCriticalError` keeps
//! every critical error raised.  `LoggingCriticalError` only logs.
//!
//! Used by tests and the demo; a real host plugs in its own transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error};

use saga_audit_contracts::{AuditRecord, SagaAuditError, SagaAuditResult};
use saga_audit_core::{CriticalError, Dispatcher, TransportOperation};

/// A transport that records operations instead of sending them.
///
/// Cloning yields a handle onto the same store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDispatcher {
    operations: Arc<Mutex<Vec<TransportOperation>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// While `true`, every dispatch fails with `DispatchFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every operation dispatched so far, in dispatch order.
    pub fn operations(&self) -> Vec<TransportOperation> {
        self.operations
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Decode the bodies of every dispatched audit record.
    ///
    /// Control messages and bodies that are not records are skipped.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.operations()
            .iter()
            .filter(|op| !op.message.body.is_empty())
            .filter_map(|op| serde_json::from_slice(&op.message.body).ok())
            .collect()
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    async fn dispatch(&self, operation: TransportOperation) -> SagaAuditResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SagaAuditError::DispatchFailed {
                destination: operation.destination,
                reason: "queue unavailable".to_string(),
            });
        }

        let mut ops = self.operations.lock().map_err(|e| SagaAuditError::DispatchFailed {
            destination: operation.destination.clone(),
            reason: format!("dispatcher state lock poisoned: {}", e),
        })?;
        debug!(
            destination = %operation.destination,
            message_id = %operation.message.message_id,
            "in-memory dispatch"
        );
        ops.push(operation);
        Ok(())
    }
}

/// Keeps every critical error message raised.
#[derive(Debug, Clone, Default)]
pub struct RecordingCriticalError {
    raised: Arc<Mutex<Vec<String>>>,
}

impl RecordingCriticalError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raised(&self) -> Vec<String> {
        self.raised.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl CriticalError for RecordingCriticalError {
    fn raise(&self, message: &str, cause: &SagaAuditError) {
        error!(cause = %cause, "{}", message);
        if let Ok(mut raised) = self.raised.lock() {
            raised.push(format!("{message} ({cause})"));
        }
    }
}

/// Logs critical errors at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCriticalError;

impl CriticalError for LoggingCriticalError {
    fn raise(&self, message: &str, cause: &SagaAuditError) {
        error!(cause = %cause, "{}", message);
    }
}
