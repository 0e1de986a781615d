//! Plugin settings.
//!
//! Settings come from a TOML document or are built in code.  Only
//! `endpoint_name` and `local_address` are required; everything else has a
//! default or is inferred.
//!
//! ```toml
//! endpoint_name = "Sales"
//! local_address = "Sales@app-01"
//! error_queue = "error@ops-01"
//! circuit_breaker_window_secs = 120
//! dispatch_timeout_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use saga_audit_contracts::{SagaAuditError, SagaAuditResult};

/// Default time failures must persist before the breaker opens.
pub const DEFAULT_CIRCUIT_BREAKER_WINDOW_SECS: u64 = 120;

/// Default bound on a single dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

fn default_window_secs() -> u64 {
    DEFAULT_CIRCUIT_BREAKER_WINDOW_SECS
}

fn default_dispatch_timeout_secs() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_SECS
}

/// Everything the delivery backend and the interceptors need to know about
/// the hosting endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaAuditSettings {
    /// Logical endpoint name, stamped on every audit record.
    pub endpoint_name: String,

    /// This endpoint's input queue; used as `ReplyToAddress`.
    pub local_address: String,

    /// Name of this machine.  Falls back to the `HOSTNAME` / `COMPUTERNAME`
    /// environment variables, then `localhost`.
    #[serde(default)]
    pub machine_name: Option<String>,

    /// Explicit backend queue.  Takes precedence over inference.
    #[serde(default)]
    pub backend_queue: Option<String>,

    /// Where failed messages go.  The backend is assumed to run next to it.
    #[serde(default)]
    pub error_queue: Option<String>,

    /// Where processed messages are audited.  Second inference source.
    #[serde(default)]
    pub audit_queue: Option<String>,

    #[serde(default = "default_window_secs")]
    pub circuit_breaker_window_secs: u64,

    /// Discard audit messages the backend has not received within this
    /// time.  Unbounded when absent.
    #[serde(default)]
    pub time_to_be_received_secs: Option<u64>,

    /// Give up on a single dispatch after this long.  `0` leaves it
    /// unbounded, so a hung transport blocks the handler.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

impl SagaAuditSettings {
    pub fn new(endpoint_name: impl Into<String>, local_address: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            local_address: local_address.into(),
            machine_name: None,
            backend_queue: None,
            error_queue: None,
            audit_queue: None,
            circuit_breaker_window_secs: DEFAULT_CIRCUIT_BREAKER_WINDOW_SECS,
            time_to_be_received_secs: None,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
        }
    }

    /// Parse `s` as TOML settings.
    ///
    /// Returns `SagaAuditError::ConfigError` if the TOML is malformed or
    /// misses a required key.
    pub fn from_toml_str(s: &str) -> SagaAuditResult<Self> {
        toml::from_str(s).map_err(|e| SagaAuditError::ConfigError {
            reason: format!("failed to parse saga audit settings: {}", e),
        })
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> SagaAuditResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SagaAuditError::ConfigError {
            reason: format!("failed to read settings file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Send audit records to `queue` instead of inferring the backend.
    pub fn with_backend_queue(mut self, queue: impl Into<String>) -> Self {
        self.backend_queue = Some(queue.into());
        self
    }

    pub fn with_error_queue(mut self, queue: impl Into<String>) -> Self {
        self.error_queue = Some(queue.into());
        self
    }

    pub fn with_audit_queue(mut self, queue: impl Into<String>) -> Self {
        self.audit_queue = Some(queue.into());
        self
    }

    pub fn with_machine_name(mut self, machine: impl Into<String>) -> Self {
        self.machine_name = Some(machine.into());
        self
    }

    pub fn circuit_breaker_window(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_window_secs)
    }

    pub fn time_to_be_received(&self) -> Option<Duration> {
        self.time_to_be_received_secs.map(Duration::from_secs)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_secs > 0).then(|| Duration::from_secs(self.dispatch_timeout_secs))
    }

    /// The configured machine name or one taken from the environment.
    pub fn resolved_machine_name(&self) -> String {
        self.machine_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}
