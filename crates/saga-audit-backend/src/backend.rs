//! Delivery of audit records to the backend.
//!
//! Every record becomes one unicast message to the resolved backend
//! address:
//!
//!   serialize (type token rewritten) → headers → dispatch → breaker bookkeeping
//!
//! Dispatch failures are recorded by the circuit breaker and swallowed.
//! Business message processing never sees them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use saga_audit_contracts::{headers, AuditRecord, MessageIntent, SagaAuditError, SagaAuditResult};
use saga_audit_core::{
    AuditDelivery, AuditRecordSerializer, CriticalError, DeliveryOutcome, Dispatcher, Headers,
    OutgoingMessage, TransportOperation,
};

use crate::address::resolve_backend_address;
use crate::breaker::RepeatedFailuresOverTimeCircuitBreaker;
use crate::config::SagaAuditSettings;

/// Name of the breaker guarding backend connectivity.
pub const CIRCUIT_BREAKER_NAME: &str = "ServiceControlConnectivity";

const SUSTAINED_FAILURE_MESSAGE: &str =
    "This endpoint has been unable to deliver saga audit records to the audit backend for an \
     extended period. Check that the backend service is running and reachable, or set \
     backend_queue in the saga audit settings to the backend's queue address, for example \
     'Particular.ServiceControl@machine'.";

const UNREACHABLE_MESSAGE: &str =
    "This endpoint could not reach the audit backend while starting. Check that the backend \
     service is installed and running, or set backend_queue in the saga audit settings to the \
     backend's queue address, for example 'Particular.ServiceControl@machine'.";

/// Sends audit records to the backend through a circuit breaker.
///
/// One instance per endpoint, shared by every concurrent invocation.
pub struct DeliveryBackend {
    dispatcher: Arc<dyn Dispatcher>,
    serializer: AuditRecordSerializer,
    critical_error: Arc<dyn CriticalError>,
    breaker: Arc<RepeatedFailuresOverTimeCircuitBreaker>,
    address: String,
    local_address: String,
    time_to_be_received: Option<Duration>,
    dispatch_timeout: Option<Duration>,
}

impl DeliveryBackend {
    /// Resolve the backend address and build the backend with its own
    /// circuit breaker.
    ///
    /// Returns `ConfigError` when no backend address can be resolved.
    pub fn new(
        settings: &SagaAuditSettings,
        dispatcher: Arc<dyn Dispatcher>,
        serializer: AuditRecordSerializer,
        critical_error: Arc<dyn CriticalError>,
    ) -> SagaAuditResult<Self> {
        let address = resolve_backend_address(settings)?;

        let notify = Arc::clone(&critical_error);
        let breaker = RepeatedFailuresOverTimeCircuitBreaker::new(
            CIRCUIT_BREAKER_NAME,
            settings.circuit_breaker_window(),
            Box::new(move |cause: &SagaAuditError| {
                notify.raise(SUSTAINED_FAILURE_MESSAGE, cause)
            }),
        );

        Ok(Self::with_breaker(
            settings,
            address,
            dispatcher,
            serializer,
            critical_error,
            Arc::new(breaker),
        ))
    }

    /// Build a backend around an already resolved address and breaker.
    pub fn with_breaker(
        settings: &SagaAuditSettings,
        address: String,
        dispatcher: Arc<dyn Dispatcher>,
        serializer: AuditRecordSerializer,
        critical_error: Arc<dyn CriticalError>,
        breaker: Arc<RepeatedFailuresOverTimeCircuitBreaker>,
    ) -> Self {
        info!(
            address = %address,
            endpoint = %settings.endpoint_name,
            "saga audit backend configured"
        );
        Self {
            dispatcher,
            serializer,
            critical_error,
            breaker,
            address,
            local_address: settings.local_address.clone(),
            time_to_be_received: settings.time_to_be_received(),
            dispatch_timeout: settings.dispatch_timeout(),
        }
    }

    /// The resolved backend address.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn circuit_breaker(&self) -> &RepeatedFailuresOverTimeCircuitBreaker {
        &self.breaker
    }

    /// Send `record`, letting the transport discard it if the backend has not
    /// received it within `time_to_be_received`.
    pub async fn send_with_deadline(
        &self,
        record: &AuditRecord,
        time_to_be_received: Option<Duration>,
    ) -> DeliveryOutcome {
        let operation = match self.build_operation(record, time_to_be_received) {
            Ok(operation) => operation,
            Err(e) => {
                warn!(saga_id = %record.saga_id, error = %e, "failed to serialize audit record");
                return DeliveryOutcome::Failed;
            }
        };

        match self.dispatch(operation).await {
            Ok(()) => {
                self.breaker.success();
                debug!(
                    saga_id = %record.saga_id,
                    address = %self.address,
                    "audit record delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    saga_id = %record.saga_id,
                    address = %self.address,
                    error = %e,
                    "failed to deliver audit record"
                );
                self.breaker.failure(&e);
                DeliveryOutcome::Failed
            }
        }
    }

    /// Probe the backend once at startup by sending it a control message.
    ///
    /// Unlike steady-state sends, a failure here is raised as a critical
    /// error and returned as `BackendUnreachable`.
    pub async fn verify_backend_reachable(&self) -> SagaAuditResult<()> {
        let mut headers = Headers::new();
        headers.insert(headers::CONTROL_MESSAGE.to_string(), "True".to_string());
        headers.insert(headers::REPLY_TO_ADDRESS.to_string(), self.local_address.clone());
        headers.insert(headers::MESSAGE_INTENT.to_string(), MessageIntent::Send.to_string());

        let operation = TransportOperation {
            message: OutgoingMessage {
                message_id: Uuid::new_v4().to_string(),
                headers,
                body: Vec::new(),
            },
            destination: self.address.clone(),
            discard_if_not_received_before: None,
        };

        match self.dispatch(operation).await {
            Ok(()) => {
                info!(address = %self.address, "audit backend reachable");
                Ok(())
            }
            Err(e) => {
                self.critical_error.raise(UNREACHABLE_MESSAGE, &e);
                Err(SagaAuditError::BackendUnreachable {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn build_operation(
        &self,
        record: &AuditRecord,
        time_to_be_received: Option<Duration>,
    ) -> SagaAuditResult<TransportOperation> {
        let body = self.serializer.serialize_for_backend(record)?;

        let mut headers = Headers::new();
        headers.insert(
            headers::ENCLOSED_MESSAGE_TYPES.to_string(),
            AuditRecord::CONTRACT_TYPE.to_string(),
        );
        headers.insert(
            headers::CONTENT_TYPE.to_string(),
            self.serializer.content_type().to_string(),
        );
        headers.insert(headers::REPLY_TO_ADDRESS.to_string(), self.local_address.clone());
        headers.insert(headers::MESSAGE_INTENT.to_string(), MessageIntent::Send.to_string());

        Ok(TransportOperation {
            message: OutgoingMessage {
                message_id: Uuid::new_v4().to_string(),
                headers,
                body,
            },
            destination: self.address.clone(),
            discard_if_not_received_before: time_to_be_received,
        })
    }

    /// Dispatch, bounded by the local dispatch timeout when one is set.
    async fn dispatch(&self, operation: TransportOperation) -> SagaAuditResult<()> {
        let Some(limit) = self.dispatch_timeout else {
            return self.dispatcher.dispatch(operation).await;
        };

        let destination = operation.destination.clone();
        match tokio::time::timeout(limit, self.dispatcher.dispatch(operation)).await {
            Ok(result) => result,
            Err(_) => Err(SagaAuditError::DispatchTimedOut {
                destination,
                timeout_ms: limit.as_millis(),
            }),
        }
    }
}

#[async_trait]
impl AuditDelivery for DeliveryBackend {
    async fn send(&self, record: AuditRecord) -> DeliveryOutcome {
        self.send_with_deadline(&record, self.time_to_be_received).await
    }
}
