//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → acceptor.rs (non-blocking accept, socket tuning, admission check)
//!     → pending.rs (unclassified sockets, tick-based timeout)
//!     → classifier.rs (peeked bytes → HTTP / HTTPS / control / unknown)
//!     → Hand off to HTTP engine or control backend
//! ```
//!
//! # Design Decisions
//! - At most one accept per tick bounds worst-case per-tick work
//! - Sockets are peeked, never read, so the eventual consumer sees the
//!   full original byte stream
//! - Pending registry is scanned in reverse index order so removal
//!   cannot skip entries

pub mod acceptor;
pub mod classifier;
pub mod control;
pub mod pending;

pub use acceptor::Acceptor;
pub use classifier::{classify, Protocol, SNIFF_LEN};
pub use control::{AcceptedSocket, ControlBackend, ControlContext};
pub use pending::{PendingRegistry, PendingSocket};
