//! Ports between the plugin and its host.
//!
//! The host implements:
//!
//! - `Dispatcher`       : the transport, used to reach the audit backend
//! - `CriticalError`    : the operator-visible fatal notification channel
//! - `MessageSerializer`: the wire format (JSON by default)
//! - `Next`             : the rest of the invoke-handler chain, ending in saga dispatch
//!
//! The plugin implements `InvokeHandlerBehavior`, `OutgoingBehavior`, and
//! `AuditDelivery`.

use std::io::Write;

use async_trait::async_trait;

use saga_audit_contracts::{AuditRecord, SagaAuditError, SagaAuditResult};

use crate::context::{
    Extensions, InvokeHandlerContext, OutgoingLogicalMessage, TransportOperation,
};

/// The remainder of an invoke-handler chain.
#[async_trait]
pub trait Next: Send + Sync {
    async fn run(&self, ctx: &mut InvokeHandlerContext) -> SagaAuditResult<()>;
}

/// A stage wrapping one handler invocation.
///
/// Implementations decide what to do before and after calling `next`.
/// Errors returned by `next` must be propagated unchanged.
#[async_trait]
pub trait InvokeHandlerBehavior: Send + Sync {
    async fn invoke(&self, ctx: &mut InvokeHandlerContext, next: &dyn Next) -> SagaAuditResult<()>;
}

/// A stage observing every message sent during a handler invocation.
///
/// The message always continues to the transport afterwards; a behavior
/// cannot veto a send.
pub trait OutgoingBehavior: Send + Sync {
    fn invoke(
        &self,
        message: &OutgoingLogicalMessage,
        extensions: &mut Extensions,
    ) -> SagaAuditResult<()>;
}

/// The transport.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatch one operation.  May suspend on network I/O.
    async fn dispatch(&self, operation: TransportOperation) -> SagaAuditResult<()>;
}

/// Operator-visible fatal notification channel.
pub trait CriticalError: Send + Sync {
    fn raise(&self, message: &str, cause: &SagaAuditError);
}

/// Stream serializer collaborator.  Owns the wire format.
pub trait MessageSerializer: Send + Sync {
    /// MIME type written to the `ContentType` header.
    fn content_type(&self) -> &str;

    /// Write `message` to `stream`.
    fn serialize(&self, message: &serde_json::Value, stream: &mut dyn Write) -> SagaAuditResult<()>;
}

/// Result of handing a record to the audit backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The attempt failed; the failure has been recorded and swallowed.
    Failed,
}

/// Sink for finalized audit records.
#[async_trait]
pub trait AuditDelivery: Send + Sync {
    /// Deliver one record.  Never fails the caller.
    async fn send(&self, record: AuditRecord) -> DeliveryOutcome;
}
