//! Capture of messages sent by a saga while it handles a message.

use tracing::debug;

use saga_audit_contracts::{headers, wire, MessageIntent, ResultingMessage, SagaAuditResult};
use saga_audit_core::{Extensions, OutgoingBehavior, OutgoingLogicalMessage};

/// Appends one [`ResultingMessage`] to the active audit record for every
/// logical message sent during a saga handler invocation.
///
/// Sends outside of saga handling, and control messages, pass through
/// untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultingMessageCapture;

impl ResultingMessageCapture {
    pub fn new() -> Self {
        Self
    }
}

impl OutgoingBehavior for ResultingMessageCapture {
    fn invoke(
        &self,
        message: &OutgoingLogicalMessage,
        extensions: &mut Extensions,
    ) -> SagaAuditResult<()> {
        let Some(record) = extensions.audit.as_mut() else {
            return Ok(());
        };
        let Some(logical) = message.message.as_ref() else {
            return Ok(());
        };

        let header = |name: &str| message.headers.get(name).map(String::as_str);

        let resulting = ResultingMessage {
            resulting_message_id: message.message_id.clone(),
            message_type: logical.message_type.clone(),
            destination: message.single_unicast_destination().map(str::to_string),
            intent: MessageIntent::from_header(header(headers::MESSAGE_INTENT)),
            time_sent: wire::wire_time_or_min(header(headers::TIME_SENT)),
            delivery_delay: message.constraints.delay_delivery_with,
            delivery_at: message.constraints.do_not_deliver_before,
        };

        debug!(
            message_id = %resulting.resulting_message_id,
            message_type = %resulting.message_type,
            intent = %resulting.intent,
            destination = resulting.destination.as_deref().unwrap_or("<none>"),
            "captured resulting message"
        );

        record.resulting_messages.push(resulting);
        Ok(())
    }
}
