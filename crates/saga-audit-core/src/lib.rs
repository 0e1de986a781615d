//! # saga-audit-core
//!
//! Host pipeline ports and per-invocation context for the saga audit plugin.
//!
//! This crate provides:
//! - The ports the host implements (`Dispatcher`, `CriticalError`,
//!   `MessageSerializer`, `Next`) and the ones the plugin implements
//!   (`InvokeHandlerBehavior`, `OutgoingBehavior`, `AuditDelivery`)
//! - `InvokeHandlerContext` with its typed `Extensions` side channel
//! - A minimal pipeline runner that fixes interceptor ordering
//! - `AuditRecordSerializer`, the adapter over the serializer collaborator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use saga_audit_core::{InvokeHandlerPipeline, OutgoingPipeline};
//!
//! let mut invoke = InvokeHandlerPipeline::new();
//! invoke.register(Arc::new(my_behavior));
//! invoke.invoke(&mut ctx, &saga_dispatch).await?;
//! ```

pub mod context;
pub mod pipeline;
pub mod serializer;
pub mod traits;

pub use context::{
    append_header_token, ActiveSagaContext, DeliveryConstraints, Extensions, Headers,
    InvokeHandlerContext, LogicalMessage, MessageHandler, OutgoingLogicalMessage, OutgoingMessage,
    RoutingStrategy, SagaEntity, TransportOperation,
};
pub use pipeline::{InvokeHandlerPipeline, OutgoingPipeline};
pub use serializer::{AuditRecordSerializer, JsonMessageSerializer, TypeNamespaceMap};
pub use traits::{
    AuditDelivery, CriticalError, DeliveryOutcome, Dispatcher, InvokeHandlerBehavior,
    MessageSerializer, Next, OutgoingBehavior,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
