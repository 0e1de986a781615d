//! Backend address resolution.
//!
//! Resolution order, first hit wins:
//!
//! 1. the explicitly configured backend queue;
//! 2. `Particular.ServiceControl@<machine>` where `<machine>` hosts the
//!    error queue;
//! 3. the same, using the audit queue's machine.
//!
//! When nothing resolves, the endpoint must not start.

use std::net::Ipv4Addr;

use tracing::info;

use saga_audit_contracts::{SagaAuditError, SagaAuditResult};

use crate::config::SagaAuditSettings;

/// Queue name of the backend service.
pub const BACKEND_SERVICE_NAME: &str = "Particular.ServiceControl";

/// A `queue@machine` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddress {
    pub queue: String,
    pub machine: String,
}

impl QueueAddress {
    /// Parse `queue[@machine]`.
    ///
    /// A missing machine, `.`, `localhost`, or the loopback address all mean
    /// `local_machine`, as does an address with more than one `@`.  An empty
    /// queue part is rejected.
    pub fn parse(address: &str, local_machine: &str) -> SagaAuditResult<Self> {
        let invalid = || SagaAuditError::InvalidAddress {
            address: address.to_string(),
        };

        let mut parts = address.split('@');
        let queue = parts.next().unwrap_or_default().trim();
        if queue.is_empty() {
            return Err(invalid());
        }

        let machine = match (parts.next(), parts.next()) {
            (None, _) => local_machine.to_string(),
            (Some(m), None) if is_local(m) => local_machine.to_string(),
            (Some(m), None) => m.trim().to_string(),
            (Some(_), Some(_)) => local_machine.to_string(),
        };

        Ok(Self {
            queue: queue.to_string(),
            machine,
        })
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.queue, self.machine)
    }
}

fn is_local(machine: &str) -> bool {
    let machine = machine.trim();
    machine.is_empty()
        || machine == "."
        || machine.eq_ignore_ascii_case("localhost")
        || machine == Ipv4Addr::LOCALHOST.to_string()
}

/// Resolve the backend queue address from `settings`.
///
/// Returns `ConfigError` when no source yields an address, and
/// `InvalidAddress` when an inference source is malformed.
pub fn resolve_backend_address(settings: &SagaAuditSettings) -> SagaAuditResult<String> {
    if let Some(explicit) = settings.backend_queue.as_deref().filter(|q| !q.trim().is_empty()) {
        info!(address = %explicit, "using configured audit backend address");
        return Ok(explicit.trim().to_string());
    }

    let local_machine = settings.resolved_machine_name();
    let inferred = [
        ("error queue", settings.error_queue.as_deref()),
        ("audit queue", settings.audit_queue.as_deref()),
    ];

    for (source, queue) in inferred {
        let Some(queue) = queue.filter(|q| !q.trim().is_empty()) else {
            continue;
        };
        let parsed = QueueAddress::parse(queue, &local_machine)?;
        let address = QueueAddress {
            queue: BACKEND_SERVICE_NAME.to_string(),
            machine: parsed.machine,
        }
        .to_string();
        info!(address = %address, source, "inferred audit backend address");
        return Ok(address);
    }

    Err(SagaAuditError::ConfigError {
        reason: format!(
            "no audit backend address could be resolved for endpoint '{}': set backend_queue, \
             or configure an error or audit queue on the machine the backend runs on",
            settings.endpoint_name
        ),
    })
}
