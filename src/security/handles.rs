//! Access-checked handle table for native resources.
//!
//! # Responsibilities
//! - Map opaque ids to exactly one native resource each
//! - Enforce type expectations on every lookup
//! - Restrict deletion of connection handles to the owning identity
//! - Guarantee a resource is destroyed exactly once, on release
//!
//! Reads are open to any holder of a valid handle; identity only
//! matters for destruction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::http::engine::ConnId;
use crate::http::response::ResponseData;

static IDENTITY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A principal that can own handles. Plugins and the extension surface
/// each hold their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(u64);

impl Identity {
    pub fn new() -> Self {
        Self(IDENTITY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "identity-{}", self.0)
    }
}

/// Opaque reference to a native resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Response,
    Connection,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleKind::Response => write!(f, "response"),
            HandleKind::Connection => write!(f, "connection"),
        }
    }
}

/// Failure of a handle operation. The operation is aborted with no
/// side effects.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("invalid handle {0}")]
    InvalidHandle(HandleId),
    #[error("handle {handle} is a {actual}, expected {expected}")]
    WrongType {
        handle: HandleId,
        expected: HandleKind,
        actual: HandleKind,
    },
    #[error("access denied for handle {0}")]
    AccessDenied(HandleId),
}

/// The resource a handle entry owns.
#[derive(Debug)]
pub enum HandleObject {
    Response(ResponseData),
    Connection(ConnId),
}

impl HandleObject {
    fn kind(&self) -> HandleKind {
        match self {
            HandleObject::Response(_) => HandleKind::Response,
            HandleObject::Connection(_) => HandleKind::Connection,
        }
    }
}

#[derive(Debug)]
struct HandleEntry {
    object: HandleObject,
    owner: Identity,
    /// Only the table's type owner may release this handle.
    delete_restricted: bool,
}

/// The handle table. One per gate service.
#[derive(Debug)]
pub struct HandleTable {
    /// Identity of the extension surface that created the handle types.
    type_owner: Identity,
    next_id: u64,
    entries: HashMap<u64, HandleEntry>,
}

impl HandleTable {
    pub fn new(type_owner: Identity) -> Self {
        Self {
            type_owner,
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, object: HandleObject, owner: Identity, delete_restricted: bool) -> HandleId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            HandleEntry {
                object,
                owner,
                delete_restricted,
            },
        );
        HandleId(id)
    }

    /// Create a response handle owned by `owner`.
    pub fn create_response(&mut self, owner: Identity, data: ResponseData) -> HandleId {
        self.insert(HandleObject::Response(data), owner, false)
    }

    /// Create a connection handle. Connections belong to the extension
    /// surface and only it may release them.
    pub fn create_connection(&mut self, conn: ConnId) -> HandleId {
        self.insert(HandleObject::Connection(conn), self.type_owner, true)
    }

    fn wrong_type(id: HandleId, expected: HandleKind, actual: HandleKind) -> HandleError {
        HandleError::WrongType {
            handle: id,
            expected,
            actual,
        }
    }

    /// Read a response. Open to any holder of a valid handle.
    pub fn response(&self, id: HandleId) -> Result<&ResponseData, HandleError> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or(HandleError::InvalidHandle(id))?;
        match &entry.object {
            HandleObject::Response(data) => Ok(data),
            other => Err(Self::wrong_type(id, HandleKind::Response, other.kind())),
        }
    }

    /// Mutate a response (header appends). Open to any holder.
    pub fn response_mut(&mut self, id: HandleId) -> Result<&mut ResponseData, HandleError> {
        let entry = self
            .entries
            .get_mut(&id.0)
            .ok_or(HandleError::InvalidHandle(id))?;
        match &mut entry.object {
            HandleObject::Response(data) => Ok(data),
            other => Err(Self::wrong_type(id, HandleKind::Response, other.kind())),
        }
    }

    /// Resolve a connection handle. Open to any holder.
    pub fn connection(&self, id: HandleId) -> Result<ConnId, HandleError> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or(HandleError::InvalidHandle(id))?;
        match &entry.object {
            HandleObject::Connection(conn) => Ok(*conn),
            other => Err(Self::wrong_type(id, HandleKind::Connection, other.kind())),
        }
    }

    /// Release a handle, destroying the underlying resource exactly
    /// once. Restricted handles may only be released by the type owner;
    /// unrestricted ones also by their own owner.
    pub fn free(&mut self, id: HandleId, caller: Identity) -> Result<HandleObject, HandleError> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or(HandleError::InvalidHandle(id))?;

        let allowed = if entry.delete_restricted {
            caller == self.type_owner
        } else {
            caller == self.type_owner || caller == entry.owner
        };
        if !allowed {
            return Err(HandleError::AccessDenied(id));
        }

        match self.entries.remove(&id.0) {
            Some(entry) => Ok(entry.object),
            None => Err(HandleError::InvalidHandle(id)),
        }
    }
}
