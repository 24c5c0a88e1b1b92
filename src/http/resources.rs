//! The HTTP extension surface: connection slots, request dispatch, and
//! the public operations plugins call.
//!
//! # Responsibilities
//! - Track a connection handle per live engine connection (side table
//!   keyed by connection id, insert-on-start / erase-on-end)
//! - Dispatch each request to the registered handler, or serve the
//!   fixed 404/500 pages
//! - Hold queued responses in an outbox until the engine collects them
//! - Expose the handle-checked operations: response construction,
//!   header mutation, response queueing, peer address reads

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;

use crate::http::engine::{ConnId, RequestSink};
use crate::http::handler::{HandlerCallback, HandlerToken, RequestHandler};
use crate::http::response::{OutboundResponse, ResponseBody, ResponseData, ResponseError};
use crate::security::handles::{HandleError, HandleId, HandleTable, Identity};

const PAGE_NOT_FOUND: &str = "<!DOCTYPE html>\n<html><body><h1>404 Not Found</h1></body></html>";
const PAGE_SERVER_ERROR: &str =
    "<!DOCTYPE html>\n<html><body><h1>500 Internal Server Error</h1></body></html>";

/// State behind the extension surface. One per gate service.
pub struct WebResources {
    /// Identity of the surface itself; owns every connection handle.
    identity: Identity,
    handles: HandleTable,
    /// Connection id → connection handle, maintained by the engine's
    /// lifecycle notifications.
    slots: HashMap<ConnId, HandleId>,
    peers: HashMap<ConnId, SocketAddr>,
    handler: Option<RequestHandler>,
    /// Responses queued per connection, drained by the engine.
    outbox: HashMap<ConnId, OutboundResponse>,
}

impl WebResources {
    pub fn new() -> Self {
        let identity = Identity::new();
        Self {
            identity,
            handles: HandleTable::new(identity),
            slots: HashMap::new(),
            peers: HashMap::new(),
            handler: None,
            outbox: HashMap::new(),
        }
    }

    /// Identity of the extension surface.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Register or replace the request handler. The previous handler,
    /// if any, is destroyed here. An empty id fails the registration
    /// and leaves the current handler untouched.
    pub fn register_request_handler(
        &mut self,
        owner: Identity,
        id: &str,
        callback: HandlerCallback,
        name: &str,
        description: &str,
    ) -> Option<HandlerToken> {
        if id.is_empty() {
            return None;
        }

        let (handler, token) = RequestHandler::new(owner, callback, name, description);
        if self.handler.is_some() {
            tracing::debug!(name = handler.name(), "Replacing request handler");
        } else {
            tracing::debug!(name = handler.name(), "Request handler registered");
        }
        self.handler = Some(handler);
        Some(token)
    }

    /// Display metadata of the current handler, if one is registered.
    pub fn handler_info(&self) -> Option<(&str, &str)> {
        self.handler.as_ref().map(|h| (h.name(), h.description()))
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Drop the registered handler. Teardown path.
    pub fn clear_handler(&mut self) {
        self.handler = None;
    }

    /// Response over a copied text buffer.
    pub fn string_response(&mut self, owner: Identity, content: &str) -> HandleId {
        self.handles
            .create_response(owner, ResponseData::from_string(content))
    }

    /// Response over a copied binary buffer.
    pub fn binary_response(&mut self, owner: Identity, content: &[u8]) -> HandleId {
        self.handles
            .create_response(owner, ResponseData::from_buffer(content))
    }

    /// Response backed by an open file.
    pub fn file_response(
        &mut self,
        owner: Identity,
        path: &Path,
    ) -> Result<HandleId, ResponseError> {
        let data = ResponseData::from_file(path)?;
        Ok(self.handles.create_response(owner, data))
    }

    /// Append a header to a not-yet-queued response.
    pub fn add_header(
        &mut self,
        response: HandleId,
        name: &str,
        value: &str,
    ) -> Result<(), HandleError> {
        self.handles.response_mut(response)?.add_header(name, value);
        Ok(())
    }

    /// Queue a response on a connection with the given status code. The
    /// response is snapshotted; releasing the handle afterwards does
    /// not affect the queued bytes.
    pub fn queue_response(
        &mut self,
        connection: HandleId,
        status: u16,
        response: HandleId,
    ) -> Result<(), HandleError> {
        let conn = self.handles.connection(connection)?;
        let data = self.handles.response(response)?;
        let outbound = data.to_outbound(status);
        self.outbox.insert(conn, outbound);
        Ok(())
    }

    /// Peer address of a connection as a dotted-decimal string.
    pub fn client_address(&self, connection: HandleId) -> Result<String, HandleError> {
        let conn = self.handles.connection(connection)?;
        match self.peers.get(&conn) {
            Some(peer) => Ok(peer.ip().to_string()),
            None => Err(HandleError::InvalidHandle(connection)),
        }
    }

    /// Release a handle on behalf of `caller`.
    pub fn free(&mut self, handle: HandleId, caller: Identity) -> Result<(), HandleError> {
        self.handles.free(handle, caller).map(drop)
    }

    /// Number of live handles. Diagnostic surface for the host.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    fn fixed_page(status: u16, body: &'static str) -> OutboundResponse {
        OutboundResponse {
            status,
            headers: Vec::new(),
            body: ResponseBody::Buffer(Bytes::from_static(body.as_bytes())),
        }
    }

    fn not_found() -> OutboundResponse {
        Self::fixed_page(404, PAGE_NOT_FOUND)
    }

    fn server_error() -> OutboundResponse {
        Self::fixed_page(500, PAGE_SERVER_ERROR)
    }
}

impl Default for WebResources {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSink for WebResources {
    fn on_connection_start(&mut self, conn: ConnId, peer: SocketAddr) {
        let handle = self.handles.create_connection(conn);
        self.slots.insert(conn, handle);
        self.peers.insert(conn, peer);
    }

    fn on_connection_end(&mut self, conn: ConnId) {
        if let Some(handle) = self.slots.remove(&conn) {
            if let Err(e) = self.handles.free(handle, self.identity) {
                tracing::error!(connection_id = %conn, error = %e, "Error freeing connection handle");
            }
        }
        self.peers.remove(&conn);
        self.outbox.remove(&conn);
    }

    fn on_request(&mut self, conn: ConnId, method: &str, url: &str) {
        // Prune a handler whose registrant dropped its token.
        if self.handler.as_ref().is_some_and(|h| !h.is_live()) {
            tracing::info!("Request handler no longer live, discarding");
            self.handler = None;
        }

        let Some(mut handler) = self.handler.take() else {
            self.outbox.insert(conn, Self::not_found());
            return;
        };

        // A connection without a slot handle is unroutable.
        let Some(&slot) = self.slots.get(&conn) else {
            tracing::error!(connection_id = %conn, "No connection handle for request");
            self.handler = Some(handler);
            self.outbox.insert(conn, Self::server_error());
            return;
        };

        let caller = handler.owner();
        let handled = {
            let mut scope = RequestScope {
                resources: self,
                caller,
            };
            handler.execute(&mut scope, slot, method, url)
        };

        if self.handler.is_none() {
            self.handler = Some(handler);
        }

        if !handled {
            self.outbox.insert(conn, Self::server_error());
        }
    }

    fn take_response(&mut self, conn: ConnId) -> Option<OutboundResponse> {
        self.outbox.remove(&conn)
    }
}

/// Operation surface handed to the handler callback for the duration of
/// one dispatch. Every operation acts with the handler's own identity.
pub struct RequestScope<'a> {
    resources: &'a mut WebResources,
    caller: Identity,
}

impl RequestScope<'_> {
    pub fn string_response(&mut self, content: &str) -> HandleId {
        self.resources.string_response(self.caller, content)
    }

    pub fn binary_response(&mut self, content: &[u8]) -> HandleId {
        self.resources.binary_response(self.caller, content)
    }

    pub fn file_response(&mut self, path: &Path) -> Result<HandleId, ResponseError> {
        self.resources.file_response(self.caller, path)
    }

    pub fn add_header(
        &mut self,
        response: HandleId,
        name: &str,
        value: &str,
    ) -> Result<(), HandleError> {
        self.resources.add_header(response, name, value)
    }

    pub fn queue_response(
        &mut self,
        connection: HandleId,
        status: u16,
        response: HandleId,
    ) -> Result<(), HandleError> {
        self.resources.queue_response(connection, status, response)
    }

    pub fn client_address(&self, connection: HandleId) -> Result<String, HandleError> {
        self.resources.client_address(connection)
    }

    pub fn free(&mut self, handle: HandleId) -> Result<(), HandleError> {
        self.resources.free(handle, self.caller)
    }
}
