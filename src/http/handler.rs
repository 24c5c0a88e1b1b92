//! The single process-wide request handler.
//!
//! Registration hands back a [`HandlerToken`]; the handler stays usable
//! only while its registrant keeps the token alive. A dropped token
//! leaves the handler stale, and the dispatch path prunes it lazily on
//! the next request.

use std::sync::{Arc, Weak};

use crate::http::resources::RequestScope;
use crate::security::handles::{HandleId, Identity};

/// Plugin callback: connection handle, method, URL. Returns whether the
/// request was handled (a truthy result implies the callback queued its
/// own response through the scope).
pub type HandlerCallback =
    Box<dyn FnMut(&mut RequestScope<'_>, HandleId, &str, &str) -> bool + Send>;

/// Liveness capability for a registered handler. Dropping it revokes
/// the handler.
pub struct HandlerToken {
    _live: Arc<()>,
}

/// A registered request handler with its display metadata.
pub struct RequestHandler {
    callback: HandlerCallback,
    live: Weak<()>,
    owner: Identity,
    name: String,
    description: String,
}

impl RequestHandler {
    pub(crate) fn new(
        owner: Identity,
        callback: HandlerCallback,
        name: &str,
        description: &str,
    ) -> (Self, HandlerToken) {
        let live = Arc::new(());
        let handler = Self {
            callback,
            live: Arc::downgrade(&live),
            owner,
            name: name.to_string(),
            description: description.to_string(),
        };
        (handler, HandlerToken { _live: live })
    }

    /// Whether the registrant still holds the capability token.
    pub fn is_live(&self) -> bool {
        self.live.strong_count() > 0
    }

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn execute(
        &mut self,
        scope: &mut RequestScope<'_>,
        connection: HandleId,
        method: &str,
        url: &str,
    ) -> bool {
        (self.callback)(scope, connection, method, url)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("name", &self.name)
            .field("live", &self.is_live())
            .finish()
    }
}
