//! Feature setup: settings and host collaborators in, interceptors out.

use std::sync::Arc;

use tracing::info;

use saga_audit_backend::{DeliveryBackend, SagaAuditSettings};
use saga_audit_capture::{CorrelationPropagator, ResultingMessageCapture, StateChangeCapture};
use saga_audit_contracts::SagaAuditResult;
use saga_audit_core::{
    AuditDelivery, AuditRecordSerializer, CriticalError, Dispatcher, InvokeHandlerPipeline,
    JsonMessageSerializer, MessageSerializer, OutgoingPipeline,
};

/// The saga audit feature for one endpoint.
///
/// Holds the shared delivery backend and the three interceptors.  Built once
/// at endpoint startup; the interceptors are then registered into the host's
/// pipelines and shared by every invocation.
pub struct SagaAudit {
    settings: SagaAuditSettings,
    backend: Arc<DeliveryBackend>,
    correlation: Arc<CorrelationPropagator>,
    state_capture: Arc<StateChangeCapture>,
    resulting_capture: Arc<ResultingMessageCapture>,
}

impl SagaAudit {
    /// Build the feature with JSON serialization.
    ///
    /// Fails with `ConfigError` when no backend address can be resolved.
    pub fn setup(
        settings: SagaAuditSettings,
        dispatcher: Arc<dyn Dispatcher>,
        critical_error: Arc<dyn CriticalError>,
    ) -> SagaAuditResult<Self> {
        Self::setup_with_serializer(
            settings,
            dispatcher,
            critical_error,
            Arc::new(JsonMessageSerializer),
        )
    }

    /// Build the feature around the host's own message serializer.
    pub fn setup_with_serializer(
        settings: SagaAuditSettings,
        dispatcher: Arc<dyn Dispatcher>,
        critical_error: Arc<dyn CriticalError>,
        serializer: Arc<dyn MessageSerializer>,
    ) -> SagaAuditResult<Self> {
        let serializer = AuditRecordSerializer::new(serializer);
        let backend = Arc::new(DeliveryBackend::new(
            &settings,
            dispatcher,
            serializer.clone(),
            critical_error,
        )?);

        let delivery: Arc<dyn AuditDelivery> = backend.clone();
        let state_capture = Arc::new(StateChangeCapture::new(
            settings.endpoint_name.clone(),
            serializer,
            delivery,
        ));

        info!(
            endpoint = %settings.endpoint_name,
            backend = %backend.address(),
            "saga audit enabled"
        );

        Ok(Self {
            settings,
            backend,
            correlation: Arc::new(CorrelationPropagator::new()),
            state_capture,
            resulting_capture: Arc::new(ResultingMessageCapture::new()),
        })
    }

    /// Add the interceptors to the host's pipelines.
    ///
    /// Must run before the host registers its saga dispatch step, so that
    /// the capture wraps it.
    pub fn register(&self, invoke: &mut InvokeHandlerPipeline, outgoing: &mut OutgoingPipeline) {
        invoke.register(self.correlation.clone());
        invoke.register(self.state_capture.clone());
        outgoing.register(self.resulting_capture.clone());
    }

    /// Probe the backend before the endpoint starts processing.
    pub async fn start(&self) -> SagaAuditResult<()> {
        self.backend.verify_backend_reachable().await?;
        info!(endpoint = %self.settings.endpoint_name, "saga audit started");
        Ok(())
    }

    pub fn backend(&self) -> &DeliveryBackend {
        &self.backend
    }

    pub fn settings(&self) -> &SagaAuditSettings {
        &self.settings
    }
}
