//! Minimal host pipeline runner.
//!
//! Two chains are modelled:
//!
//!   invoke-handler:  behavior[0] → behavior[1] → … → terminal (saga dispatch + handler)
//!   outgoing:        every behavior, in order, for each message the handler sends
//!
//! Behaviors registered in the invoke-handler pipeline therefore always run
//! before the host's saga dispatch step, and whatever they do after `next`
//! returns runs after it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use saga_audit_contracts::SagaAuditResult;

use crate::context::{Extensions, InvokeHandlerContext, OutgoingLogicalMessage};
use crate::traits::{InvokeHandlerBehavior, Next, OutgoingBehavior};

/// Ordered invoke-handler behaviors.
#[derive(Default)]
pub struct InvokeHandlerPipeline {
    behaviors: Vec<Arc<dyn InvokeHandlerBehavior>>,
}

impl InvokeHandlerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a behavior.  Behaviors run in registration order.
    pub fn register(&mut self, behavior: Arc<dyn InvokeHandlerBehavior>) {
        self.behaviors.push(behavior);
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Run every behavior around `terminal`.
    pub async fn invoke(
        &self,
        ctx: &mut InvokeHandlerContext,
        terminal: &dyn Next,
    ) -> SagaAuditResult<()> {
        debug!(
            message_id = %ctx.message_id(),
            handler = %ctx.handler().handler_type,
            behaviors = self.behaviors.len(),
            "invoking handler pipeline"
        );
        let chain = Chain {
            behaviors: &self.behaviors,
            terminal,
        };
        chain.run(ctx).await
    }
}

/// The unexecuted tail of an invoke-handler pipeline.
struct Chain<'a> {
    behaviors: &'a [Arc<dyn InvokeHandlerBehavior>],
    terminal: &'a dyn Next,
}

#[async_trait]
impl Next for Chain<'_> {
    async fn run(&self, ctx: &mut InvokeHandlerContext) -> SagaAuditResult<()> {
        match self.behaviors.split_first() {
            None => self.terminal.run(ctx).await,
            Some((first, rest)) => {
                let next = Chain {
                    behaviors: rest,
                    terminal: self.terminal,
                };
                first.invoke(ctx, &next).await
            }
        }
    }
}

/// Ordered outgoing behaviors.
#[derive(Default)]
pub struct OutgoingPipeline {
    behaviors: Vec<Arc<dyn OutgoingBehavior>>,
}

impl OutgoingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, behavior: Arc<dyn OutgoingBehavior>) {
        self.behaviors.push(behavior);
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub fn invoke(
        &self,
        message: &OutgoingLogicalMessage,
        extensions: &mut Extensions,
    ) -> SagaAuditResult<()> {
        for behavior in &self.behaviors {
            behavior.invoke(message, extensions)?;
        }
        Ok(())
    }
}
