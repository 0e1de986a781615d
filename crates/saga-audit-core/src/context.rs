//! Per-invocation context passed through the pipeline.
//!
//! An `InvokeHandlerContext` is created by the host for one handler
//! invocation and owned exclusively by that invocation.  Interceptors
//! exchange data through its typed [`Extensions`] rather than through an
//! untyped bag keyed by type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use saga_audit_contracts::{headers::TOKEN_SEPARATOR, AuditRecord, SagaAuditResult};

use crate::pipeline::OutgoingPipeline;

/// Message headers.  Ordered so that dispatched messages are reproducible.
pub type Headers = BTreeMap<String, String>;

/// Append `token` to a `;`-separated header value, creating the header when
/// it is absent or empty.  Existing tokens are never reordered or removed.
pub fn append_header_token(headers: &mut Headers, name: &str, token: &str) {
    match headers.get_mut(name) {
        Some(existing) if !existing.is_empty() => {
            existing.push(TOKEN_SEPARATOR);
            existing.push_str(token);
        }
        _ => {
            headers.insert(name.to_string(), token.to_string());
        }
    }
}

// ── Saga side channel ─────────────────────────────────────────────────────────

/// The persisted data of a saga instance.
///
/// `data` holds the user-defined fields; the three well-known fields are
/// serialized alongside them so that snapshots look like the stored entity.
/// A `data` key that collides with a well-known field is left out of the
/// snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SagaEntity {
    pub id: Uuid,
    pub originator: Option<String>,
    pub original_message_id: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl SagaEntity {
    /// Snapshot names of the well-known fields.
    pub const RESERVED_FIELDS: [&'static str; 3] = ["Id", "Originator", "OriginalMessageId"];

    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            originator: None,
            original_message_id: None,
            data: serde_json::Map::new(),
        }
    }

    /// User-defined fields that would shadow a well-known one.
    pub fn shadowing_keys(&self) -> impl Iterator<Item = &str> {
        self.data
            .keys()
            .map(String::as_str)
            .filter(|key| Self::RESERVED_FIELDS.contains(key))
    }
}

impl Serialize for SagaEntity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let [id, originator, original_message_id] = Self::RESERVED_FIELDS;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(id, &self.id)?;
        map.serialize_entry(originator, &self.originator)?;
        map.serialize_entry(original_message_id, &self.original_message_id)?;
        for (key, value) in &self.data {
            if !Self::RESERVED_FIELDS.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Set by the host's saga dispatch step when a saga instance was actually
/// engaged by this invocation.  Absent when the handler is not a saga or the
/// saga lookup found nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSagaContext {
    /// Full type name of the saga.
    pub saga_type: String,
    /// The saga's persisted data as it stood when the handler returned.
    pub entity: SagaEntity,
    /// True when this invocation created the instance.
    pub is_new: bool,
    /// True when the handler marked the saga complete.
    pub is_completed: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl ActiveSagaContext {
    /// The `InvokedSagas` correlation token for this instance.
    pub fn correlation_token(&self) -> String {
        format!("{}:{}", self.saga_type, self.entity.id)
    }
}

/// Typed state shared between the interceptors of one invocation.
#[derive(Debug, Default)]
pub struct Extensions {
    pub active_saga: Option<ActiveSagaContext>,
    pub audit: Option<AuditRecord>,
}

// ── Invoke-handler context ────────────────────────────────────────────────────

/// The handler about to be invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandler {
    pub handler_type: String,
    pub is_saga: bool,
}

impl MessageHandler {
    pub fn saga(handler_type: impl Into<String>) -> Self {
        Self {
            handler_type: handler_type.into(),
            is_saga: true,
        }
    }

    pub fn plain(handler_type: impl Into<String>) -> Self {
        Self {
            handler_type: handler_type.into(),
            is_saga: false,
        }
    }
}

/// Context for one handler invocation on one inbound message.
pub struct InvokeHandlerContext {
    message_id: String,
    message_type: String,
    headers: Headers,
    handler: MessageHandler,
    outgoing: Arc<OutgoingPipeline>,
    outbox: Vec<OutgoingLogicalMessage>,
    /// Side channel between interceptors and the host's saga dispatch.
    pub extensions: Extensions,
}

impl InvokeHandlerContext {
    pub fn new(
        message_id: impl Into<String>,
        message_type: impl Into<String>,
        headers: Headers,
        handler: MessageHandler,
        outgoing: Arc<OutgoingPipeline>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            headers,
            handler,
            outgoing,
            outbox: Vec::new(),
            extensions: Extensions::default(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Full type name of the inbound message.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Headers of the inbound message.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Send a message from inside the handler.
    ///
    /// Runs the outgoing pipeline with this invocation's extensions, then
    /// queues the message for the host to dispatch after the handler
    /// completes.
    pub fn send(&mut self, message: OutgoingLogicalMessage) -> SagaAuditResult<()> {
        let outgoing = Arc::clone(&self.outgoing);
        outgoing.invoke(&message, &mut self.extensions)?;
        self.outbox.push(message);
        Ok(())
    }

    /// Messages sent during this invocation, in send order.
    pub fn outbox(&self) -> &[OutgoingLogicalMessage] {
        &self.outbox
    }

    /// Consume the context, returning the (possibly updated) inbound headers
    /// and the outbox.
    pub fn into_parts(self) -> (Headers, Vec<OutgoingLogicalMessage>) {
        (self.headers, self.outbox)
    }
}

// ── Outgoing side ─────────────────────────────────────────────────────────────

/// How the host routes an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Deliver to exactly this address.
    Unicast { destination: String },
    /// Deliver to every subscriber of the message type.
    Multicast { message_type: String },
}

/// Delivery constraints attached to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryConstraints {
    /// `DelayDeliveryWith`.
    pub delay_delivery_with: Option<Duration>,
    /// `DoNotDeliverBefore`.
    pub do_not_deliver_before: Option<DateTime<Utc>>,
    /// `DiscardIfNotReceivedBefore`.
    pub discard_if_not_received_before: Option<Duration>,
}

/// The application-level payload of an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    /// Full type name.
    pub message_type: String,
    pub body: serde_json::Value,
}

/// An outgoing message as seen by the outgoing pipeline.
///
/// `message` is `None` for control messages, which carry only headers.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingLogicalMessage {
    pub message_id: String,
    pub headers: Headers,
    pub message: Option<LogicalMessage>,
    pub routing: Vec<RoutingStrategy>,
    pub constraints: DeliveryConstraints,
}

impl OutgoingLogicalMessage {
    /// Unicast addresses this message resolves to.
    pub fn unicast_destinations(&self) -> impl Iterator<Item = &str> {
        self.routing.iter().filter_map(|r| match r {
            RoutingStrategy::Unicast { destination } => Some(destination.as_str()),
            RoutingStrategy::Multicast { .. } => None,
        })
    }

    /// The destination when routing yields exactly one unicast target.
    pub fn single_unicast_destination(&self) -> Option<&str> {
        let mut targets = self.unicast_destinations();
        match (targets.next(), targets.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// One dispatch: a message, its unicast destination, and its time to be
/// received.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOperation {
    pub message: OutgoingMessage,
    pub destination: String,
    /// `None` means the transport may keep the message indefinitely.
    pub discard_if_not_received_before: Option<Duration>,
}
