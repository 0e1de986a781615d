//! # saga-audit-plugin
//!
//! Endpoint-side saga audit: every saga state change, together with the
//! messages the saga sent while making it, is reported to the audit backend.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use saga_audit_plugin::{SagaAudit, SagaAuditSettings};
//!
//! let settings = SagaAuditSettings::from_file(Path::new("saga-audit.toml"))?;
//! let audit = SagaAudit::setup(settings, dispatcher, critical_error)?;
//! audit.register(&mut invoke_pipeline, &mut outgoing_pipeline);
//! audit.start().await?;
//! ```

pub mod plugin;

pub use plugin::SagaAudit;
pub use saga_audit_backend::{
    InMemoryDispatcher, LoggingCriticalError, RecordingCriticalError, SagaAuditSettings,
};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use saga_audit_backend::CircuitState;
    use saga_audit_contracts::{headers, wire, MessageIntent, SagaAuditError, SagaAuditResult};
    use saga_audit_core::{
        ActiveSagaContext, DeliveryConstraints, Headers, InvokeHandlerContext,
        InvokeHandlerPipeline, LogicalMessage, MessageHandler, Next, OutgoingLogicalMessage,
        OutgoingPipeline, RoutingStrategy, SagaEntity,
    };

    use super::*;

    const ORDER_ID: &str = "Sales.OrderId";
    const SAGA_TYPE: &str = "Sales.OrderSaga";

    // ── Host fakes ────────────────────────────────────────────────────────────

    /// What the saga handler does for one message type.
    #[derive(Clone, Default)]
    struct Plan {
        starts_saga: bool,
        completes: bool,
        sends: Vec<OutgoingLogicalMessage>,
    }

    /// Stands in for the host's saga persistence and dispatch: finds or
    /// creates the instance for the `OrderId` header and runs the plan.
    #[derive(Default)]
    struct OrderSagaHost {
        plans: HashMap<&'static str, Plan>,
        store: Mutex<HashMap<String, SagaEntity>>,
    }

    impl OrderSagaHost {
        fn with_plan(mut self, message_type: &'static str, plan: Plan) -> Self {
            self.plans.insert(message_type, plan);
            self
        }
    }

    #[async_trait]
    impl Next for OrderSagaHost {
        async fn run(&self, ctx: &mut InvokeHandlerContext) -> SagaAuditResult<()> {
            let plan = self.plans.get(ctx.message_type()).cloned().unwrap_or_default();
            let order_id = ctx.header(ORDER_ID).unwrap_or_default().to_string();

            let found = {
                let mut store = self.store.lock().unwrap();
                match store.get(&order_id) {
                    Some(entity) => Some((entity.clone(), false)),
                    None if plan.starts_saga => {
                        let mut entity = SagaEntity::new(Uuid::new_v4());
                        entity.data.insert("OrderId".to_string(), serde_json::json!(order_id));
                        store.insert(order_id.clone(), entity.clone());
                        Some((entity, true))
                    }
                    None => None,
                }
            };
            let Some((mut entity, is_new)) = found else {
                return Ok(());
            };

            for message in plan.sends {
                ctx.send(message)?;
            }

            entity
                .data
                .insert("LastMessage".to_string(), serde_json::json!(ctx.message_type()));
            {
                let mut store = self.store.lock().unwrap();
                if plan.completes {
                    store.remove(&order_id);
                } else {
                    store.insert(order_id, entity.clone());
                }
            }

            ctx.extensions.active_saga = Some(ActiveSagaContext {
                saga_type: SAGA_TYPE.to_string(),
                entity,
                is_new,
                is_completed: plan.completes,
                created: Utc::now(),
                modified: Utc::now(),
            });
            Ok(())
        }
    }

    struct Endpoint {
        audit: SagaAudit,
        invoke: InvokeHandlerPipeline,
        outgoing: Arc<OutgoingPipeline>,
        dispatcher: InMemoryDispatcher,
        critical: RecordingCriticalError,
        host: OrderSagaHost,
    }

    impl Endpoint {
        fn new(settings: SagaAuditSettings, host: OrderSagaHost) -> Self {
            let dispatcher = InMemoryDispatcher::new();
            let critical = RecordingCriticalError::new();
            let audit = SagaAudit::setup(
                settings,
                Arc::new(dispatcher.clone()),
                Arc::new(critical.clone()),
            )
            .unwrap();

            let mut invoke = InvokeHandlerPipeline::new();
            let mut outgoing = OutgoingPipeline::new();
            audit.register(&mut invoke, &mut outgoing);

            Self {
                audit,
                invoke,
                outgoing: Arc::new(outgoing),
                dispatcher,
                critical,
                host,
            }
        }

        /// Handle one inbound message; returns its headers afterwards.
        async fn handle(&self, message_type: &str, headers: Headers) -> Headers {
            let mut ctx = InvokeHandlerContext::new(
                Uuid::new_v4().to_string(),
                message_type,
                headers,
                MessageHandler::saga(SAGA_TYPE),
                self.outgoing.clone(),
            );
            self.invoke.invoke(&mut ctx, &self.host).await.unwrap();
            ctx.into_parts().0
        }
    }

    fn settings() -> SagaAuditSettings {
        SagaAuditSettings::new("Sales", "Sales@app-01")
            .with_machine_name("app-01")
            .with_error_queue("error@ops-01")
    }

    fn order(id: &str) -> Headers {
        let mut h = Headers::new();
        h.insert(ORDER_ID.to_string(), id.to_string());
        h.insert(headers::ORIGINATING_ENDPOINT.to_string(), "Web".to_string());
        h.insert(headers::MESSAGE_INTENT.to_string(), "Send".to_string());
        h
    }

    fn send(
        id: &str,
        message_type: &str,
        intent: MessageIntent,
        routing: Vec<RoutingStrategy>,
    ) -> OutgoingLogicalMessage {
        let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut h = Headers::new();
        h.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        h.insert(headers::TIME_SENT.to_string(), wire::to_wire_time(sent_at));
        OutgoingLogicalMessage {
            message_id: id.to_string(),
            headers: h,
            message: Some(LogicalMessage {
                message_type: message_type.to_string(),
                body: serde_json::json!({}),
            }),
            routing,
            constraints: DeliveryConstraints::default(),
        }
    }

    fn unicast(destination: &str) -> RoutingStrategy {
        RoutingStrategy::Unicast {
            destination: destination.to_string(),
        }
    }

    fn to(destination: &str) -> Vec<RoutingStrategy> {
        vec![unicast(destination)]
    }

    fn order_saga() -> OrderSagaHost {
        OrderSagaHost::default()
            .with_plan(
                "Sales.PlaceOrder",
                Plan {
                    starts_saga: true,
                    ..Default::default()
                },
            )
            .with_plan(
                "Sales.ShipOrder",
                Plan {
                    completes: true,
                    ..Default::default()
                },
            )
            .with_plan("Sales.CancelOrder", Plan::default())
    }

    // ── Setup ─────────────────────────────────────────────────────────────────

    #[test]
    fn register_places_interceptors_in_both_pipelines() {
        let endpoint = Endpoint::new(settings(), order_saga());
        assert_eq!(endpoint.invoke.len(), 2);
        assert_eq!(endpoint.outgoing.len(), 1);
        assert_eq!(endpoint.audit.backend().address(), "Particular.ServiceControl@ops-01");
        assert_eq!(endpoint.audit.settings().endpoint_name, "Sales");
    }

    #[test]
    fn setup_fails_without_a_backend_address() {
        let result = SagaAudit::setup(
            SagaAuditSettings::new("Sales", "Sales@app-01"),
            Arc::new(InMemoryDispatcher::new()),
            Arc::new(LoggingCriticalError),
        );
        assert!(matches!(result, Err(SagaAuditError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn start_probes_the_backend() {
        let endpoint = Endpoint::new(settings(), order_saga());
        endpoint.audit.start().await.unwrap();
        assert_eq!(endpoint.dispatcher.operations().len(), 1);

        endpoint.dispatcher.set_failing(true);
        let err = endpoint.audit.start().await.unwrap_err();
        assert!(matches!(err, SagaAuditError::BackendUnreachable { .. }));
        assert_eq!(endpoint.critical.raised().len(), 1);
    }

    // ── Capture ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn each_engaged_invocation_yields_one_record() {
        let endpoint = Endpoint::new(settings(), order_saga());

        endpoint.handle("Sales.PlaceOrder", order("o-1")).await;
        endpoint.handle("Sales.ShipOrder", order("o-1")).await;

        let records = endpoint.dispatcher.audit_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].saga_id, records[1].saga_id);
        for record in &records {
            assert_eq!(record.saga_type, SAGA_TYPE);
            assert_eq!(record.endpoint, "Sales");
            assert_eq!(record.initiator.originating_endpoint.as_deref(), Some("Web"));
        }
        assert!(records[0].is_new && !records[0].is_completed);
        assert!(!records[1].is_new && records[1].is_completed);
        assert!(records[1].saga_state.contains("Sales.ShipOrder"));
    }

    #[tokio::test]
    async fn saga_not_found_emits_nothing_and_leaves_headers_alone() {
        let endpoint = Endpoint::new(settings(), order_saga());
        let mut inbound = order("unknown");
        inbound.insert(headers::INVOKED_SAGAS.to_string(), "Billing.PaymentSaga:p-1".to_string());

        let after = endpoint.handle("Sales.CancelOrder", inbound).await;

        assert!(endpoint.dispatcher.operations().is_empty());
        assert_eq!(
            after.get(headers::INVOKED_SAGAS).map(String::as_str),
            Some("Billing.PaymentSaga:p-1")
        );
        assert!(!after.contains_key(headers::SAGA_STATE_CHANGE));
    }

    #[tokio::test]
    async fn resulting_messages_keep_send_order_type_and_intent() {
        let host = order_saga().with_plan(
            "Sales.PlaceOrder",
            Plan {
                starts_saga: true,
                sends: vec![
                    send("a", "Sales.BillOrder", MessageIntent::Send, to("Billing@app-02")),
                    send("b", "Sales.OrderPlaced", MessageIntent::Publish, Vec::new()),
                ],
                ..Default::default()
            },
        );
        let endpoint = Endpoint::new(settings(), host);

        endpoint.handle("Sales.PlaceOrder", order("o-1")).await;

        let records = endpoint.dispatcher.audit_records();
        let resulting = &records[0].resulting_messages;
        assert_eq!(resulting.len(), 2);
        assert_eq!(resulting[0].resulting_message_id, "a");
        assert_eq!(resulting[0].message_type, "Sales.BillOrder");
        assert_eq!(resulting[0].intent, MessageIntent::Send);
        assert_eq!(resulting[1].resulting_message_id, "b");
        assert_eq!(resulting[1].message_type, "Sales.OrderPlaced");
        assert_eq!(resulting[1].intent, MessageIntent::Publish);
    }

    #[tokio::test]
    async fn destination_only_for_a_single_unicast_target() {
        let host = order_saga().with_plan(
            "Sales.PlaceOrder",
            Plan {
                starts_saga: true,
                sends: vec![
                    send("one", "Sales.BillOrder", MessageIntent::Send, to("Billing@app-02")),
                    send("none", "Sales.OrderPlaced", MessageIntent::Publish, Vec::new()),
                    send(
                        "many",
                        "Sales.NotifyOrder",
                        MessageIntent::Send,
                        vec![unicast("Email@app-03"), unicast("Sms@app-04")],
                    ),
                ],
                ..Default::default()
            },
        );
        let endpoint = Endpoint::new(settings(), host);

        endpoint.handle("Sales.PlaceOrder", order("o-1")).await;

        let records = endpoint.dispatcher.audit_records();
        let destinations: Vec<_> = records[0]
            .resulting_messages
            .iter()
            .map(|m| m.destination.as_deref())
            .collect();
        assert_eq!(destinations, [Some("Billing@app-02"), None, None]);
    }

    #[tokio::test]
    async fn invoked_sagas_accumulates_along_a_causal_chain() {
        let endpoint = Endpoint::new(settings(), order_saga());

        let first = endpoint.handle("Sales.PlaceOrder", order("o-1")).await;
        let mut next = first.clone();
        next.insert(ORDER_ID.to_string(), "o-2".to_string());
        let second = endpoint.handle("Sales.PlaceOrder", next).await;

        let records = endpoint.dispatcher.audit_records();
        let expected = format!(
            "{SAGA_TYPE}:{};{SAGA_TYPE}:{}",
            records[0].saga_id, records[1].saga_id
        );
        assert_eq!(
            second.get(headers::INVOKED_SAGAS).map(String::as_str),
            Some(expected.as_str())
        );
        assert_eq!(
            second.get(headers::SAGA_STATE_CHANGE).map(String::as_str),
            Some(format!("{}:New;{}:New", records[0].saga_id, records[1].saga_id).as_str())
        );
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn backend_outage_never_fails_the_handler_and_trips_once_per_streak() {
        let mut s = settings();
        s.circuit_breaker_window_secs = 0;
        let endpoint = Endpoint::new(s, order_saga());
        endpoint.dispatcher.set_failing(true);

        for i in 0..3 {
            endpoint.handle("Sales.PlaceOrder", order(&format!("o-{i}"))).await;
        }
        assert_eq!(endpoint.critical.raised().len(), 1);
        assert_eq!(endpoint.audit.backend().circuit_breaker().state(), CircuitState::Open);

        endpoint.dispatcher.set_failing(false);
        endpoint.handle("Sales.PlaceOrder", order("o-3")).await;
        assert_eq!(endpoint.audit.backend().circuit_breaker().state(), CircuitState::Closed);
        assert_eq!(endpoint.critical.raised().len(), 1);

        endpoint.dispatcher.set_failing(true);
        endpoint.handle("Sales.PlaceOrder", order("o-4")).await;
        assert_eq!(endpoint.critical.raised().len(), 2);
    }

    #[tokio::test]
    async fn backend_body_round_trips_every_field() {
        let mut delayed = send("a", "Sales.RemindCustomer", MessageIntent::Send, to("Crm@app-05"));
        delayed.constraints.delay_delivery_with = Some(Duration::from_secs(90));
        let mut scheduled = send("b", "Sales.CloseOrder", MessageIntent::Send, to("Sales@app-01"));
        scheduled.constraints.do_not_deliver_before =
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());

        let host = order_saga().with_plan(
            "Sales.PlaceOrder",
            Plan {
                starts_saga: true,
                sends: vec![delayed, scheduled],
                ..Default::default()
            },
        );
        let endpoint = Endpoint::new(settings(), host);

        let mut inbound = order("o-1");
        inbound.insert(headers::TIME_SENT.to_string(), "2024-05-01 09:59:58:123456 Z".to_string());
        inbound.insert(headers::IS_SAGA_TIMEOUT_MESSAGE.to_string(), "True".to_string());
        endpoint.handle("Sales.PlaceOrder", inbound).await;

        let ops = endpoint.dispatcher.operations();
        let mut body: serde_json::Value = serde_json::from_slice(&ops[0].message.body).unwrap();
        let token = body
            .as_object_mut()
            .and_then(|fields| fields.remove("$type"))
            .unwrap();
        assert_eq!(
            token,
            "ServiceControl.EndpointPlugin.Messages.SagaState.SagaUpdatedMessage, ServiceControl"
        );

        let records = endpoint.dispatcher.audit_records();
        let record = &records[0];
        assert_eq!(serde_json::to_value(record).unwrap(), body);

        assert!(record.initiator.is_saga_timeout_message);
        assert_eq!(
            record.initiator.time_sent,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 58).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
        let resulting = &record.resulting_messages;
        assert_eq!(resulting[0].delivery_delay, Some(Duration::from_secs(90)));
        assert_eq!(resulting[0].delivery_at, None);
        assert_eq!(
            resulting[1].delivery_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap())
        );
    }
}
