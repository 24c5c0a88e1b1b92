//! Shared-port protocol gate.
//!
//! Shares one listening TCP port between an administrative control
//! protocol and HTTP(S). The first bytes a client sends are the only
//! signal available, so the gate accepts the raw socket, peeks the
//! opening bytes without consuming them, classifies the protocol, and
//! hands the socket to the right consumer — all non-blocking, driven by
//! the host's own tick loop.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────┐
//!                    │               SHARED-PORT GATE                 │
//!                    │                                                │
//!   TCP connection   │  ┌──────────┐   ┌──────────┐   ┌───────────┐  │
//!   ─────────────────┼─▶│ acceptor │──▶│ pending  │──▶│classifier │  │
//!                    │  └──────────┘   │ registry │   └─────┬─────┘  │
//!                    │                 └──────────┘         │        │
//!                    │            HTTP / HTTPS ◀────────────┴──▶ control
//!                    │                 │                         │    │
//!                    │           ┌───────────┐            ┌──────────┐│
//!                    │           │HTTP engine│            │ control  ││
//!                    │           │+ resources│            │ backend  ││
//!                    │           └───────────┘            └──────────┘│
//!                    │                                                │
//!                    │  ┌──────────────────────────────────────────┐  │
//!                    │  │          Cross-Cutting Concerns           │  │
//!                    │  │  config · security (handles) · lifecycle  │  │
//!                    │  │            · observability                │  │
//!                    │  └──────────────────────────────────────────┘  │
//!                    └───────────────────────────────────────────────┘
//! ```
//!
//! Everything runs single-threaded inside one host tick: accept first,
//! then classification of pending sockets, then the HTTP engine's own
//! I/O round. Per-connection failures are handled locally and never
//! cross the tick boundary.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GateConfig;
pub use lifecycle::{ArmMode, GateError, GateService};
pub use net::{AcceptedSocket, ControlBackend};
pub use security::Identity;
