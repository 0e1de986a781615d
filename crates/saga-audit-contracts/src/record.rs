//! The audit record sent to the backend, and its embedded parts.
//!
//! Field names are serialized in PascalCase because the backend
//! deserializes them into its own contract type of the same shape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{intent::MessageIntent, wire};

/// One saga state transition plus every message the saga sent while
/// handling the message that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuditRecord {
    /// Id of the saga instance's persisted data.
    pub saga_id: Uuid,

    /// Full type name of the saga.
    pub saga_type: String,

    /// Logical name of the endpoint that hosts the saga.
    pub endpoint: String,

    /// True when the saga instance was created by this message.
    pub is_new: bool,

    /// True when the handler marked the saga as complete.
    pub is_completed: bool,

    /// Wall-clock time (UTC) just before the handler ran.
    pub start_time: DateTime<Utc>,

    /// Wall-clock time (UTC) just after the handler returned.
    pub finish_time: DateTime<Utc>,

    /// Serialized snapshot of the saga data at record-close time.
    pub saga_state: String,

    /// The message that drove this state change.
    pub initiator: Initiator,

    /// Messages sent by the handler, in send order.
    pub resulting_messages: Vec<ResultingMessage>,
}

impl AuditRecord {
    /// Full type name the backend knows this record under.  Sent in the
    /// `EnclosedMessageTypes` header.
    pub const CONTRACT_TYPE: &'static str =
        "ServiceControl.EndpointPlugin.Messages.SagaState.SagaUpdatedMessage";

    /// Open a record for a handler invocation that starts at `start_time`.
    ///
    /// Identity, status, and initiator fields are filled in when the record
    /// is finalized.
    pub fn started(start_time: DateTime<Utc>) -> Self {
        Self {
            saga_id: Uuid::nil(),
            saga_type: String::new(),
            endpoint: String::new(),
            is_new: false,
            is_completed: false,
            start_time,
            finish_time: start_time,
            saga_state: String::new(),
            initiator: Initiator::default(),
            resulting_messages: Vec::new(),
        }
    }

    /// How the state change is summarised in the `SagaStateChange` header.
    pub fn state_change(&self) -> SagaStateChange {
        if self.is_completed {
            SagaStateChange::Completed
        } else if self.is_new {
            SagaStateChange::New
        } else {
            SagaStateChange::Updated
        }
    }
}

/// Describes the inbound message that caused a saga state change.
///
/// All fields except the timeout flag are best effort: header data that is
/// missing falls back to a documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Initiator {
    pub initiating_message_id: String,
    pub originating_machine: Option<String>,
    pub originating_endpoint: Option<String>,
    pub message_type: String,
    /// Epoch-minimum sentinel when the header is absent.
    pub time_sent: DateTime<Utc>,
    /// `Send` when the header is absent.
    pub intent: MessageIntent,
    pub is_saga_timeout_message: bool,
}

impl Default for Initiator {
    fn default() -> Self {
        Self {
            initiating_message_id: String::new(),
            originating_machine: None,
            originating_endpoint: None,
            message_type: String::new(),
            time_sent: wire::min_timestamp(),
            intent: MessageIntent::Send,
            is_saga_timeout_message: false,
        }
    }
}

/// One outbound message produced while a saga handler ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultingMessage {
    pub resulting_message_id: String,
    pub message_type: String,
    /// Set only when routing resolved to exactly one unicast address.
    pub destination: Option<String>,
    pub intent: MessageIntent,
    pub time_sent: DateTime<Utc>,
    #[serde(default, with = "wire::option_timespan")]
    pub delivery_delay: Option<Duration>,
    #[serde(default)]
    pub delivery_at: Option<DateTime<Utc>>,
}

/// Outcome of one handler invocation for one saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStateChange {
    New,
    Updated,
    Completed,
}

impl SagaStateChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStateChange::New => "New",
            SagaStateChange::Updated => "Updated",
            SagaStateChange::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for SagaStateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
