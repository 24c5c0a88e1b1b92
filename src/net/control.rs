//! Contract between the gate and the control-protocol server.
//!
//! The gate never parses the control protocol. It asks the backend
//! whether a fresh socket may be accepted at all, hands classified
//! sockets over with their byte streams untouched, and reports
//! connections that never identified themselves so the backend can
//! apply its own banning policy.

use std::any::Any;
use std::net::{SocketAddr, TcpStream};

/// Opaque per-socket bookkeeping value owned by the control backend.
pub type ControlContext = Box<dyn Any + Send>;

/// A socket classified as control protocol, ready for the backend.
///
/// Ownership transfers fully with this struct; the gate retains no
/// reference to the stream.
pub struct AcceptedSocket {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Whatever `on_socket_adopted` returned for this socket.
    pub context: Option<ControlContext>,
}

/// Downstream consumer for the control-protocol side of the shared port.
pub trait ControlBackend {
    /// Admission check, asked once per freshly accepted socket before it
    /// enters the pending registry. Refusal closes the socket
    /// immediately.
    fn should_accept(&mut self, stream: &TcpStream, peer: SocketAddr) -> bool {
        let _ = (stream, peer);
        true
    }

    /// A socket was classified as control protocol and queued for this
    /// backend. The returned context travels with the socket.
    fn on_socket_adopted(&mut self, peer: SocketAddr) -> Option<ControlContext> {
        let _ = peer;
        None
    }

    /// The backend closed one of its adopted sockets. Receives back the
    /// context produced at adoption. Called by the backend's own
    /// machinery, present here to complete the contract.
    fn on_socket_closed(&mut self, peer: SocketAddr, context: Option<ControlContext>) {
        let _ = (peer, context);
    }

    /// A connection timed out unclassified or spoke an unknown protocol.
    /// Best effort; the default does nothing, which simply disables
    /// banning.
    fn notify_failed_attempt(&mut self, peer: SocketAddr) {
        let _ = peer;
    }
}
