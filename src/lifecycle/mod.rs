//! Service lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Host frame loop
//!     → frame_begin()            (arm demultiplexing)
//!     → process_accept()         (accept → classify → hand off → pump)
//!     → frame_end()              (disarm)
//!
//! Outside the armed window, process_accept() falls back to the
//! original behavior: every socket goes to the control backend.
//! ```
//!
//! # Design Decisions
//! - Fail fast: listener preparation errors refuse initialization
//! - A host without frame boundaries constructs with ArmMode::Always
//!   and degrades to demultiplexing every tick
//! - Teardown is explicit so lifecycle notifications still fire

pub mod service;

pub use service::{ArmMode, GateError, GateService, GateStatus};
