//! # saga-audit-capture
//!
//! Pipeline interceptors that turn saga handler invocations into audit
//! records.
//!
//! ## Overview
//!
//! - [`StateChangeCapture`] opens an audit record before the saga handler
//!   runs and finalizes it afterwards, when a saga was actually engaged.
//! - [`ResultingMessageCapture`] appends every message the handler sends to
//!   the open record, in send order.
//! - [`CorrelationPropagator`] stamps the `InvokedSagas` header.
//!
//! The first and last go into the invoke-handler pipeline ahead of the
//! host's saga dispatch; the second goes into the outgoing pipeline.

pub mod invoked;
pub mod resulting;
pub mod state;

pub use invoked::CorrelationPropagator;
pub use resulting::ResultingMessageCapture;
pub use state::{build_initiator, StateChangeCapture};

// ── Tests ─────────────────────────────────────────────────────────────────────
