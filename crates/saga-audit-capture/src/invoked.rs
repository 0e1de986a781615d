//! `InvokedSagas` correlation header.

use async_trait::async_trait;
use tracing::debug;

use saga_audit_contracts::{headers, SagaAuditResult};
use saga_audit_core::{append_header_token, InvokeHandlerBehavior, InvokeHandlerContext, Next};

/// After a handler completes, appends `<sagaType>:<sagaId>` to the inbound
/// message's `InvokedSagas` header when a saga was engaged.
///
/// Runs whether or not a state change gets audited.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationPropagator;

impl CorrelationPropagator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InvokeHandlerBehavior for CorrelationPropagator {
    async fn invoke(&self, ctx: &mut InvokeHandlerContext, next: &dyn Next) -> SagaAuditResult<()> {
        next.run(ctx).await?;

        let Some(token) = ctx
            .extensions
            .active_saga
            .as_ref()
            .map(|active| active.correlation_token())
        else {
            return Ok(());
        };

        append_header_token(ctx.headers_mut(), headers::INVOKED_SAGAS, &token);
        debug!(
            message_id = %ctx.message_id(),
            invoked_sagas = ctx.header(headers::INVOKED_SAGAS).unwrap_or_default(),
            "recorded invoked saga"
        );
        Ok(())
    }
}
