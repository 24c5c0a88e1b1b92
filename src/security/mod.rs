//! Handle security subsystem.
//!
//! Native resources (responses, connections) are never exposed as raw
//! references across the extension surface. Holders get opaque handles
//! that are validated, type-checked, and access-checked on every use.

pub mod handles;

pub use handles::{HandleError, HandleId, HandleKind, HandleTable, Identity};
