//! Shared listen socket ownership and non-blocking accept.
//!
//! # Responsibilities
//! - Perform at most one non-blocking accept per tick
//! - Tune accepted sockets (TCP_NODELAY, SO_REUSEADDR, non-blocking)
//! - Delegate the admission decision to the control backend
//! - Adopt classified sockets into the control backend's queue

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use socket2::SockRef;

use crate::net::control::{AcceptedSocket, ControlBackend};

/// Owns the shared listening socket and the control handoff queue.
pub struct Acceptor {
    listener: TcpListener,
    accepted: Vec<AcceptedSocket>,
}

impl Acceptor {
    /// Take ownership of a bound listener and switch it to non-blocking
    /// mode. Failure here is fatal to gate construction.
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            accepted: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// One non-blocking accept. Returns a tuned, admitted socket, or
    /// `None` when nothing is waiting, tuning failed, or the backend
    /// refused admission. Accepting at most one connection per tick
    /// bounds worst-case per-tick work.
    pub fn accept_one(&mut self, control: &mut dyn ControlBackend) -> Option<(TcpStream, SocketAddr)> {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                tracing::error!(error = %e, "Accept failed");
                return None;
            }
        };

        tracing::debug!(peer_addr = %peer, "New listen socket accepted");

        if let Err(e) = tune_socket(&stream) {
            tracing::warn!(peer_addr = %peer, error = %e, "Failed to set socket options");
            return None;
        }

        if !control.should_accept(&stream, peer) {
            tracing::debug!(peer_addr = %peer, "Backend rejected connection");
            return None;
        }

        Some((stream, peer))
    }

    /// Construct an [`AcceptedSocket`] for the control backend and queue
    /// it. The backend populates the opaque context and later drains the
    /// queue with [`take_accepted`](Self::take_accepted).
    pub fn adopt_into_control(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        control: &mut dyn ControlBackend,
    ) {
        let context = control.on_socket_adopted(peer);
        self.accepted.push(AcceptedSocket {
            stream,
            peer,
            context,
        });
    }

    /// Hand every queued control socket to the caller. Ownership
    /// transfers fully.
    pub fn take_accepted(&mut self) -> Vec<AcceptedSocket> {
        std::mem::take(&mut self.accepted)
    }
}

/// Socket tuning applied to every accepted connection before admission.
fn tune_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_reuse_address(true)?;
    stream.set_nonblocking(true)?;
    Ok(())
}
