//! Serialization of saga snapshots and audit records.
//!
//! `AuditRecordSerializer` holds no format logic of its own.  It converts a
//! value into the serializer data model, lets the injected
//! [`MessageSerializer`] write it into a buffer, and decodes the buffer as
//! UTF-8.
//!
//! Records sent to the backend also carry a `$type` token naming their
//! contract type.  The backend resolves that type under its own assembly
//! name, so the token goes through a [`TypeNamespaceMap`] first.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use saga_audit_contracts::{AuditRecord, SagaAuditError, SagaAuditResult};

use crate::context::SagaEntity;
use crate::traits::MessageSerializer;

/// JSON content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Name of the JSON property carrying the contract type token.
pub const TYPE_TOKEN_PROPERTY: &str = "$type";

/// The assembly the record contract lives in on this side of the wire.
pub const INTERNAL_CONTRACT_ASSEMBLY: &str = "ServiceControl.Plugin.SagaAudit";

/// The assembly the backend resolves the same contract in.
pub const BACKEND_CONTRACT_ASSEMBLY: &str = "ServiceControl";

// ── Default serializer ────────────────────────────────────────────────────────

/// The default `MessageSerializer`: compact JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageSerializer;

impl MessageSerializer for JsonMessageSerializer {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_JSON
    }

    fn serialize(
        &self,
        message: &serde_json::Value,
        stream: &mut dyn Write,
    ) -> SagaAuditResult<()> {
        serde_json::to_writer(stream, message)?;
        Ok(())
    }
}

// ── Type token rewriting ──────────────────────────────────────────────────────

/// Assembly substitutions applied to `$type` tokens of the form
/// `"<FullTypeName>, <Assembly>"`.
///
/// | internal assembly                  | backend assembly |
/// |------------------------------------|------------------|
/// | `ServiceControl.Plugin.SagaAudit`  | `ServiceControl` |
#[derive(Debug, Clone)]
pub struct TypeNamespaceMap {
    substitutions: Vec<(String, String)>,
}

impl Default for TypeNamespaceMap {
    fn default() -> Self {
        Self {
            substitutions: vec![(
                INTERNAL_CONTRACT_ASSEMBLY.to_string(),
                BACKEND_CONTRACT_ASSEMBLY.to_string(),
            )],
        }
    }
}

impl TypeNamespaceMap {
    /// A map that leaves every token untouched.
    pub fn identity() -> Self {
        Self {
            substitutions: Vec::new(),
        }
    }

    pub fn with_substitution(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.substitutions.push((from.into(), to.into()));
        self
    }

    /// Token for `full_type_name` as declared in `assembly`.
    pub fn internal_token(full_type_name: &str, assembly: &str) -> String {
        format!("{full_type_name}, {assembly}")
    }

    /// Rewrite the assembly part of `token` if it appears in the table.
    pub fn rewrite(&self, token: &str) -> String {
        let Some((type_name, assembly)) = token.split_once(", ") else {
            return token.to_string();
        };
        match self.substitutions.iter().find(|(from, _)| from == assembly) {
            Some((_, to)) => Self::internal_token(type_name, to),
            None => token.to_string(),
        }
    }
}

// ── AuditRecordSerializer ─────────────────────────────────────────────────────

/// Adapts a stream-based `MessageSerializer` to string and byte results.
#[derive(Clone)]
pub struct AuditRecordSerializer {
    serializer: Arc<dyn MessageSerializer>,
    type_map: TypeNamespaceMap,
}

impl AuditRecordSerializer {
    pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
        Self {
            serializer,
            type_map: TypeNamespaceMap::default(),
        }
    }

    pub fn with_type_map(mut self, type_map: TypeNamespaceMap) -> Self {
        self.type_map = type_map;
        self
    }

    pub fn content_type(&self) -> &str {
        self.serializer.content_type()
    }

    /// Serialize any value to a UTF-8 string.
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> SagaAuditResult<String> {
        let model = serde_json::to_value(value)?;
        let bytes = self.write(&model)?;
        String::from_utf8(bytes).map_err(|e| SagaAuditError::Serialization {
            reason: format!("serializer produced invalid UTF-8: {}", e),
        })
    }

    /// Snapshot of a saga's persisted data.
    pub fn serialize_entity(&self, entity: &SagaEntity) -> SagaAuditResult<String> {
        for key in entity.shadowing_keys() {
            warn!(
                saga_id = %entity.id,
                field = key,
                "saga data field shadows a well-known field; omitted from snapshot"
            );
        }
        self.serialize(entity)
    }

    /// Body of the message carrying `record` to the backend, with the
    /// contract type token rewritten for the backend.
    pub fn serialize_for_backend(&self, record: &AuditRecord) -> SagaAuditResult<Vec<u8>> {
        let mut model = serde_json::to_value(record)?;
        let token = self.type_map.rewrite(&TypeNamespaceMap::internal_token(
            AuditRecord::CONTRACT_TYPE,
            INTERNAL_CONTRACT_ASSEMBLY,
        ));
        debug!(saga_id = %record.saga_id, type_token = %token, "serializing audit record");

        match model.as_object_mut() {
            Some(fields) => {
                fields.insert(TYPE_TOKEN_PROPERTY.to_string(), serde_json::Value::String(token));
            }
            None => {
                return Err(SagaAuditError::Serialization {
                    reason: "audit record did not serialize to an object".to_string(),
                })
            }
        }

        self.write(&model)
    }

    fn write(&self, model: &serde_json::Value) -> SagaAuditResult<Vec<u8>> {
        let mut buffer = Vec::new();
        self.serializer.serialize(model, &mut buffer)?;
        Ok(buffer)
    }
}
