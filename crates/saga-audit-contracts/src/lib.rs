//! # saga-audit-contracts
//!
//! Wire entities, header names, and error types for the saga audit plugin.
//!
//! All crates in the workspace import from here.  No pipeline logic lives in
//! this crate, only data definitions, wire formats, and error types.

pub mod error;
pub mod headers;
pub mod intent;
pub mod record;
pub mod wire;

pub use error::{SagaAuditError, SagaAuditResult};
pub use intent::MessageIntent;
pub use record::{AuditRecord, Initiator, ResultingMessage, SagaStateChange};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    // ── AuditRecord ──────────────────────────────────────────────────────────

    #[test]
    fn state_change_prefers_completed_over_new() {
        let mut record = AuditRecord::started(Utc::now());
        assert_eq!(record.state_change(), SagaStateChange::Updated);

        record.is_new = true;
        assert_eq!(record.state_change(), SagaStateChange::New);

        record.is_completed = true;
        assert_eq!(record.state_change(), SagaStateChange::Completed);
    }

    #[test]
    fn started_record_has_empty_identity_and_default_initiator() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = AuditRecord::started(start);

        assert_eq!(record.saga_id, Uuid::nil());
        assert_eq!(record.start_time, start);
        assert!(record.resulting_messages.is_empty());
        assert_eq!(record.initiator.intent, MessageIntent::Send);
        assert_eq!(record.initiator.time_sent, wire::min_timestamp());
    }

    #[test]
    fn record_serializes_with_pascal_case_fields() {
        let mut record = AuditRecord::started(Utc::now());
        record.resulting_messages.push(ResultingMessage {
            resulting_message_id: "m-1".to_string(),
            message_type: "Sales.ShipOrder".to_string(),
            destination: None,
            intent: MessageIntent::Publish,
            time_sent: Utc::now(),
            delivery_delay: Some(Duration::from_secs(5)),
            delivery_at: None,
        });

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("SagaId").is_some());
        assert!(json.get("IsCompleted").is_some());
        assert_eq!(json["Initiator"]["Intent"], "Send");
        assert_eq!(json["ResultingMessages"][0]["Intent"], "Publish");
        assert_eq!(json["ResultingMessages"][0]["DeliveryDelay"], "00:00:05");
        assert!(json["ResultingMessages"][0]["Destination"].is_null());
    }

    // ── MessageIntent ────────────────────────────────────────────────────────

    #[test]
    fn intent_header_parsing_is_lenient() {
        assert_eq!(MessageIntent::from_header(Some("Publish")), MessageIntent::Publish);
        assert_eq!(MessageIntent::from_header(Some("reply")), MessageIntent::Reply);
        assert_eq!(MessageIntent::from_header(Some("bogus")), MessageIntent::Send);
        assert_eq!(MessageIntent::from_header(None), MessageIntent::Send);
    }

    // ── SagaAuditError display messages ──────────────────────────────────────

    #[test]
    fn error_config_error_display() {
        let err = SagaAuditError::ConfigError {
            reason: "no backend address".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("configuration error"));
        assert!(msg.contains("no backend address"));
    }

    #[test]
    fn error_dispatch_failed_display() {
        let err = SagaAuditError::DispatchFailed {
            destination: "Particular.ServiceControl@box".to_string(),
            reason: "queue not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Particular.ServiceControl@box"));
        assert!(msg.contains("queue not found"));
    }

    #[test]
    fn error_from_serde_json_is_serialization() {
        let parse_err = serde_json::from_str::<AuditRecord>("{not json").unwrap_err();
        let err: SagaAuditError = parse_err.into();
        assert!(matches!(err, SagaAuditError::Serialization { .. }));
    }
}
