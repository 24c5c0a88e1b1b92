//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging via the tracing crate
//! - Log level configurable via config and the RUST_LOG environment
//!   variable, environment winning
//! - Per-tick counters are exposed through `GateStatus`, not a metrics
//!   endpoint; the gate is embedded and the host owns exposition

pub mod logging;
