//! A tiny order-fulfilment endpoint: saga storage, saga dispatch and the
//! `OrderSaga` handler, standing in for what a messaging host provides.
//!
//! Lifecycle of one order:
//!
//!   PlaceOrder          → new saga; charge customer, publish OrderAccepted,
//!                         request a buyer's-remorse timeout
//!   BuyersRemorseTimeout → ship the order
//!   OrderShipped        → saga completes
//!
//! Messages for an order with no saga instance are ignored, as a host does
//! when saga lookup finds nothing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use saga_audit_contracts::{headers, wire, MessageIntent, SagaAuditError, SagaAuditResult};
use saga_audit_core::{
    ActiveSagaContext, DeliveryConstraints, Headers, InvokeHandlerContext, LogicalMessage, Next,
    OutgoingLogicalMessage, RoutingStrategy, SagaEntity,
};

pub const SAGA_TYPE: &str = "Sales.OrderSaga";

/// Correlation header carrying the order id.
pub const ORDER_ID_HEADER: &str = "Sales.OrderId";

pub const PLACE_ORDER: &str = "Sales.PlaceOrder";
pub const BUYERS_REMORSE_TIMEOUT: &str = "Sales.BuyersRemorseTimeout";
pub const ORDER_SHIPPED: &str = "Shipping.OrderShipped";

const BUYERS_REMORSE: Duration = Duration::from_secs(20);

/// Saga persistence plus dispatch for `OrderSaga`.
pub struct OrderSagaHost {
    local_address: String,
    store: Mutex<HashMap<String, SagaEntity>>,
}

impl OrderSagaHost {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Number of orders still in flight.
    pub fn open_sagas(&self) -> usize {
        self.store.lock().map(|s| s.len()).unwrap_or_default()
    }

    fn load(&self, order_id: &str) -> SagaAuditResult<Option<SagaEntity>> {
        let store = self.store.lock().map_err(|e| SagaAuditError::HandlerFailed {
            reason: format!("saga store lock poisoned: {}", e),
        })?;
        Ok(store.get(order_id).cloned())
    }

    fn save(&self, order_id: &str, entity: Option<SagaEntity>) -> SagaAuditResult<()> {
        let mut store = self.store.lock().map_err(|e| SagaAuditError::HandlerFailed {
            reason: format!("saga store lock poisoned: {}", e),
        })?;
        match entity {
            Some(entity) => store.insert(order_id.to_string(), entity),
            None => store.remove(order_id),
        };
        Ok(())
    }

    fn outgoing(
        &self,
        message_type: &str,
        intent: MessageIntent,
        routing: Vec<RoutingStrategy>,
        body: serde_json::Value,
    ) -> OutgoingLogicalMessage {
        let mut headers = Headers::new();
        headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        headers.insert(headers::TIME_SENT.to_string(), wire::to_wire_time(Utc::now()));
        headers.insert(headers::REPLY_TO_ADDRESS.to_string(), self.local_address.clone());
        OutgoingLogicalMessage {
            message_id: Uuid::new_v4().to_string(),
            headers,
            message: Some(LogicalMessage {
                message_type: message_type.to_string(),
                body,
            }),
            routing,
            constraints: DeliveryConstraints::default(),
        }
    }
}

fn unicast(destination: &str) -> Vec<RoutingStrategy> {
    vec![RoutingStrategy::Unicast {
        destination: destination.to_string(),
    }]
}

#[async_trait]
impl Next for OrderSagaHost {
    async fn run(&self, ctx: &mut InvokeHandlerContext) -> SagaAuditResult<()> {
        let Some(order_id) = ctx.header(ORDER_ID_HEADER).map(str::to_string) else {
            return Ok(());
        };
        let message_type = ctx.message_type().to_string();

        let (mut entity, is_new) = match (self.load(&order_id)?, message_type.as_str()) {
            (Some(entity), _) => (entity, false),
            (None, PLACE_ORDER) => {
                let mut entity = SagaEntity::new(Uuid::new_v4());
                entity.originator = ctx.header(headers::REPLY_TO_ADDRESS).map(str::to_string);
                entity.original_message_id = Some(ctx.message_id().to_string());
                entity.data.insert("OrderId".to_string(), json!(order_id));
                (entity, true)
            }
            (None, _) => return Ok(()),
        };

        let mut is_completed = false;
        match message_type.as_str() {
            PLACE_ORDER => {
                ctx.send(self.outgoing(
                    "Billing.ChargeCustomer",
                    MessageIntent::Send,
                    unicast("Billing@app-02"),
                    json!({ "OrderId": order_id }),
                ))?;
                ctx.send(self.outgoing(
                    "Sales.OrderAccepted",
                    MessageIntent::Publish,
                    Vec::new(),
                    json!({ "OrderId": order_id }),
                ))?;

                let mut timeout = self.outgoing(
                    BUYERS_REMORSE_TIMEOUT,
                    MessageIntent::Send,
                    unicast(&self.local_address),
                    json!({}),
                );
                timeout
                    .headers
                    .insert(headers::IS_SAGA_TIMEOUT_MESSAGE.to_string(), "True".to_string());
                timeout.constraints.delay_delivery_with = Some(BUYERS_REMORSE);
                ctx.send(timeout)?;

                entity.data.insert("Status".to_string(), json!("Accepted"));
            }
            BUYERS_REMORSE_TIMEOUT => {
                ctx.send(self.outgoing(
                    "Shipping.ShipOrder",
                    MessageIntent::Send,
                    unicast("Shipping@app-03"),
                    json!({ "OrderId": order_id }),
                ))?;
                entity.data.insert("Status".to_string(), json!("Shipping"));
            }
            ORDER_SHIPPED => {
                entity.data.insert("Status".to_string(), json!("Shipped"));
                is_completed = true;
            }
            _ => {}
        }

        self.save(&order_id, (!is_completed).then(|| entity.clone()))?;

        let now = Utc::now();
        ctx.extensions.active_saga = Some(ActiveSagaContext {
            saga_type: SAGA_TYPE.to_string(),
            entity,
            is_new,
            is_completed,
            created: now,
            modified: now,
        });
        Ok(())
    }
}
