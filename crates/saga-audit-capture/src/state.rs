//! Saga state change capture.
//!
//! `StateChangeCapture` wraps one handler invocation:
//!
//!   open record → next (saga dispatch + handler) → finalize → deliver
//!
//! The open record lives in `Extensions::audit` while the handler runs, so
//! that `ResultingMessageCapture` can append to it.  Finalization only
//! happens when the host's saga dispatch left an `ActiveSagaContext` behind;
//! otherwise the record is dropped without a trace.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use saga_audit_contracts::{
    headers, wire, AuditRecord, Initiator, MessageIntent, SagaAuditResult,
};
use saga_audit_core::{
    append_header_token, AuditDelivery, AuditRecordSerializer, Headers, InvokeHandlerBehavior,
    InvokeHandlerContext, Next,
};

/// Records saga state changes and hands them to an [`AuditDelivery`].
///
/// Must be registered ahead of the host's saga dispatch step.
pub struct StateChangeCapture {
    endpoint: String,
    serializer: AuditRecordSerializer,
    delivery: Arc<dyn AuditDelivery>,
}

impl StateChangeCapture {
    pub fn new(
        endpoint: impl Into<String>,
        serializer: AuditRecordSerializer,
        delivery: Arc<dyn AuditDelivery>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            serializer,
            delivery,
        }
    }

    /// Fill identity, status, snapshot and initiator fields of `record`.
    ///
    /// Returns `false` when there is nothing to audit.
    fn finalize(&self, ctx: &InvokeHandlerContext, record: &mut AuditRecord) -> bool {
        let Some(active) = ctx.extensions.active_saga.as_ref() else {
            debug!(
                message_id = %ctx.message_id(),
                handler = %ctx.handler().handler_type,
                "no saga engaged, discarding audit record"
            );
            return false;
        };

        let saga_state = match self.serializer.serialize_entity(&active.entity) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    saga_id = %active.entity.id,
                    saga_type = %active.saga_type,
                    error = %e,
                    "failed to snapshot saga state, discarding audit record"
                );
                return false;
            }
        };

        record.finish_time = Utc::now();
        record.saga_id = active.entity.id;
        record.saga_type = active.saga_type.clone();
        record.endpoint = self.endpoint.clone();
        record.is_new = active.is_new;
        record.is_completed = active.is_completed;
        record.saga_state = saga_state;
        record.initiator = build_initiator(ctx.headers(), ctx.message_id(), ctx.message_type());
        true
    }
}

#[async_trait]
impl InvokeHandlerBehavior for StateChangeCapture {
    async fn invoke(&self, ctx: &mut InvokeHandlerContext, next: &dyn Next) -> SagaAuditResult<()> {
        if !ctx.handler().is_saga {
            return next.run(ctx).await;
        }

        ctx.extensions.audit = Some(AuditRecord::started(Utc::now()));
        let outcome = next.run(ctx).await;
        let record = ctx.extensions.audit.take();
        outcome?;

        let Some(mut record) = record else {
            return Ok(());
        };
        if !self.finalize(ctx, &mut record) {
            return Ok(());
        }

        let summary = format!("{}:{}", record.saga_id, record.state_change());
        append_header_token(ctx.headers_mut(), headers::SAGA_STATE_CHANGE, &summary);

        debug!(
            saga_id = %record.saga_id,
            saga_type = %record.saga_type,
            state_change = %record.state_change(),
            resulting_messages = record.resulting_messages.len(),
            "saga state change captured"
        );

        self.delivery.send(record).await;
        Ok(())
    }
}

/// Describe the inbound message from its headers.
///
/// Missing data is never an error: intent defaults to `Send`, the send time
/// to the minimum sentinel, and the timeout flag to `false`.
pub fn build_initiator(headers: &Headers, message_id: &str, message_type: &str) -> Initiator {
    let get = |name: &str| headers.get(name).map(String::as_str);

    Initiator {
        initiating_message_id: message_id.to_string(),
        originating_machine: get(headers::ORIGINATING_MACHINE).map(str::to_string),
        originating_endpoint: get(headers::ORIGINATING_ENDPOINT).map(str::to_string),
        message_type: message_type.to_string(),
        time_sent: wire::wire_time_or_min(get(headers::TIME_SENT)),
        intent: MessageIntent::from_header(get(headers::MESSAGE_INTENT)),
        is_saga_timeout_message: get(headers::IS_SAGA_TIMEOUT_MESSAGE)
            .is_some_and(|v| v.eq_ignore_ascii_case("true")),
    }
}
