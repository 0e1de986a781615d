//! Saga audit demo CLI
//!
//! Runs an order-fulfilment endpoint with the saga audit plugin enabled and
//! an in-memory transport standing in for the audit backend.
//!
//! Usage:
//!   cargo run -p demo -- run --orders 3
//!   cargo run -p demo -- run --config demo/saga-audit.toml --fail-backend
//!   cargo run -p demo -- outage --messages 5
//!   cargo run -p demo -- resolve-address

mod order_saga;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use saga_audit_backend::{resolve_backend_address, InMemoryDispatcher, RecordingCriticalError};
use saga_audit_contracts::{headers, wire, AuditRecord, SagaAuditResult};
use saga_audit_core::{
    Headers, InvokeHandlerContext, InvokeHandlerPipeline, MessageHandler, OutgoingPipeline,
};
use saga_audit_plugin::{SagaAudit, SagaAuditSettings};

use order_saga::{
    OrderSagaHost, BUYERS_REMORSE_TIMEOUT, ORDER_ID_HEADER, ORDER_SHIPPED, PLACE_ORDER, SAGA_TYPE,
};

/// Settings used when no `--config` is given.
const DEFAULT_SETTINGS: &str = include_str!("../saga-audit.toml");

// ── CLI definition ────────────────────────────────────────────────────────────

/// Saga audit demo.
///
/// Each subcommand drives the order saga endpoint and prints what the audit
/// backend received.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Saga audit plugin demo",
    long_about = "Runs an order saga endpoint with saga auditing enabled, showing captured\n\
                  state changes, resulting messages, and backend outage handling."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Take orders through their whole lifecycle and print the audit trail.
    Run {
        /// Number of orders to process.
        #[arg(long, default_value_t = 3)]
        orders: usize,
        /// Settings file (TOML).  Defaults to the bundled demo settings.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Take the backend down after startup; handlers keep succeeding.
        #[arg(long)]
        fail_backend: bool,
    },
    /// Keep the backend down and watch the circuit breaker trip once.
    Outage {
        /// Number of orders placed while the backend is down.
        #[arg(long, default_value_t = 5)]
        messages: usize,
    },
    /// Print the backend address the settings resolve to.
    ResolveAddress {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for per-message detail.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            orders,
            config,
            fail_backend,
        } => run(orders, config, fail_backend).await,
        Command::Outage { messages } => outage(messages).await,
        Command::ResolveAddress { config } => resolve(config),
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

// ── Endpoint wiring ───────────────────────────────────────────────────────────

/// The order endpoint with saga auditing registered into its pipelines.
struct Endpoint {
    audit: SagaAudit,
    invoke: InvokeHandlerPipeline,
    outgoing: Arc<OutgoingPipeline>,
    host: OrderSagaHost,
    dispatcher: InMemoryDispatcher,
    critical: RecordingCriticalError,
}

impl Endpoint {
    fn new(settings: SagaAuditSettings) -> SagaAuditResult<Self> {
        let dispatcher = InMemoryDispatcher::new();
        let critical = RecordingCriticalError::new();
        let host = OrderSagaHost::new(settings.local_address.clone());

        let audit = SagaAudit::setup(
            settings,
            Arc::new(dispatcher.clone()),
            Arc::new(critical.clone()),
        )?;

        let mut invoke = InvokeHandlerPipeline::new();
        let mut outgoing = OutgoingPipeline::new();
        audit.register(&mut invoke, &mut outgoing);

        Ok(Self {
            audit,
            invoke,
            outgoing: Arc::new(outgoing),
            host,
            dispatcher,
            critical,
        })
    }

    async fn handle(&self, message_type: &str, order_id: &str) -> SagaAuditResult<Headers> {
        let mut headers = Headers::new();
        headers.insert(ORDER_ID_HEADER.to_string(), order_id.to_string());
        headers.insert(headers::ORIGINATING_ENDPOINT.to_string(), "Web".to_string());
        headers.insert(headers::ORIGINATING_MACHINE.to_string(), "web-01".to_string());
        headers.insert(headers::TIME_SENT.to_string(), wire::to_wire_time(chrono::Utc::now()));
        if message_type == BUYERS_REMORSE_TIMEOUT {
            headers.insert(headers::IS_SAGA_TIMEOUT_MESSAGE.to_string(), "True".to_string());
        }

        let mut ctx = InvokeHandlerContext::new(
            Uuid::new_v4().to_string(),
            message_type,
            headers,
            MessageHandler::saga(SAGA_TYPE),
            self.outgoing.clone(),
        );
        self.invoke.invoke(&mut ctx, &self.host).await?;
        Ok(ctx.into_parts().0)
    }
}

fn load_settings(config: Option<PathBuf>) -> SagaAuditResult<SagaAuditSettings> {
    match config {
        Some(path) => SagaAuditSettings::from_file(&path),
        None => SagaAuditSettings::from_toml_str(DEFAULT_SETTINGS),
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run(orders: usize, config: Option<PathBuf>, fail_backend: bool) -> SagaAuditResult<()> {
    let endpoint = Endpoint::new(load_settings(config)?)?;
    endpoint.audit.start().await?;
    println!("Audit backend: {}", endpoint.audit.backend().address());
    info!(
        orders,
        address = %endpoint.audit.backend().address(),
        fail_backend,
        "order endpoint started"
    );

    if fail_backend {
        println!("Backend taken down; audit records will be dropped.");
        endpoint.dispatcher.set_failing(true);
    }

    for n in 1..=orders {
        let order_id = format!("order-{n}");
        for message_type in [PLACE_ORDER, BUYERS_REMORSE_TIMEOUT, ORDER_SHIPPED] {
            let headers = endpoint.handle(message_type, &order_id).await?;
            println!(
                "  {:<10} {:<28} InvokedSagas={}",
                order_id,
                message_type,
                headers.get(headers::INVOKED_SAGAS).map(String::as_str).unwrap_or("-"),
            );
        }
    }

    println!();
    print_audit_trail(&endpoint.dispatcher.audit_records());
    println!(
        "Open sagas: {}  Breaker failures: {}",
        endpoint.host.open_sagas(),
        endpoint.audit.backend().circuit_breaker().failure_count()
    );
    Ok(())
}

async fn outage(messages: usize) -> SagaAuditResult<()> {
    let mut settings = SagaAuditSettings::from_toml_str(DEFAULT_SETTINGS)?;
    settings.circuit_breaker_window_secs = 0;
    let endpoint = Endpoint::new(settings)?;
    endpoint.audit.start().await?;

    endpoint.dispatcher.set_failing(true);
    info!(messages, "audit backend taken down");
    for n in 1..=messages {
        endpoint.handle(PLACE_ORDER, &format!("order-{n}")).await?;
    }

    let breaker = endpoint.audit.backend().circuit_breaker();
    println!(
        "Handled {} orders with the backend down: breaker {:?} after {} failures.",
        messages,
        breaker.state(),
        breaker.failure_count()
    );
    for raised in endpoint.critical.raised() {
        println!("Critical error: {}", raised);
    }

    endpoint.dispatcher.set_failing(false);
    endpoint.handle(PLACE_ORDER, "order-recovered").await?;
    println!("Backend restored: breaker {:?}.", breaker.state());
    Ok(())
}

fn resolve(config: Option<PathBuf>) -> SagaAuditResult<()> {
    let settings = load_settings(config)?;
    println!("{}", resolve_backend_address(&settings)?);
    Ok(())
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_audit_trail(records: &[AuditRecord]) {
    println!("Audit backend received {} records:", records.len());
    for record in records {
        println!(
            "  {} {:<9} initiator={} resulting={}",
            record.saga_id,
            record.state_change().as_str(),
            record.initiator.message_type,
            record.resulting_messages.len()
        );
        for message in &record.resulting_messages {
            println!(
                "      → {:<24} {:<8} {}",
                message.message_type,
                message.intent.as_str(),
                message.destination.as_deref().unwrap_or("(no single destination)")
            );
        }
    }
    println!();
}
