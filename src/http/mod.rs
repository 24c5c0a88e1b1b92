//! Embedded HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! Demultiplexed socket
//!     → engine.rs (adoption, non-blocking read/parse/write, keep-alive)
//!     → resources.rs (connection slots, dispatch, response outbox)
//!     → handler.rs (single replaceable plugin callback)
//!     → response.rs (buffer- or file-backed bodies, headers)
//!     → Bytes written back by engine.rs
//! ```
//!
//! # Design Decisions
//! - The engine only ever talks to the resource layer through the
//!   `RequestSink` trait, mirroring the handoff contract of the
//!   demultiplexer itself
//! - Responses are queued through an outbox keyed by connection id, so
//!   a handler may answer during dispatch or on any later tick
//! - One request handler process-wide; registration replaces the
//!   previous handler

pub mod engine;
pub mod handler;
pub mod resources;
pub mod response;

pub use engine::{ConnId, HttpEngine, RequestSink};
pub use handler::{HandlerToken, RequestHandler};
pub use resources::{RequestScope, WebResources};
pub use response::{OutboundResponse, ResponseBody, ResponseData, ResponseError};
