//! The gate service: construction, the per-tick driver, frame arming.
//!
//! One `GateService` owns the whole demultiplexer — acceptor, pending
//! registry, embedded HTTP engine, and extension surface — and is
//! driven by the host calling [`GateService::process_accept`] once per
//! tick.

use std::io;
use std::net::{SocketAddr, TcpListener};

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::GateConfig;
use crate::http::engine::HttpEngine;
use crate::http::resources::WebResources;
use crate::net::acceptor::Acceptor;
use crate::net::classifier::{classify, Protocol, SNIFF_LEN};
use crate::net::control::{AcceptedSocket, ControlBackend};
use crate::net::pending::{PendingRegistry, PendingSocket};

/// Startup failure. Per-connection errors never surface here; only
/// initialization can fail.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("failed to prepare the shared listen socket")]
    Listener(#[source] io::Error),
}

/// How demultiplexing is gated against the host's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Demultiplex only between `frame_begin` and `frame_end`.
    FrameScoped,
    /// Demultiplex on every tick. Degraded mode for hosts that cannot
    /// provide frame boundaries.
    Always,
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub ticks: u64,
    pub pending_sockets: usize,
    pub http_connections: usize,
    pub live_handles: usize,
    pub handler: Option<String>,
}

/// The shared-port gate.
pub struct GateService<C: ControlBackend> {
    config: GateConfig,
    acceptor: Acceptor,
    pending: PendingRegistry,
    engine: HttpEngine,
    resources: WebResources,
    control: C,
    arm_mode: ArmMode,
    armed: bool,
    ticks: u64,
}

impl<C: ControlBackend> GateService<C> {
    /// Build a gate over a bound listener. The listener switches to
    /// non-blocking mode here; failure refuses initialization.
    pub fn new(
        listener: TcpListener,
        control: C,
        config: GateConfig,
        arm_mode: ArmMode,
    ) -> Result<Self, GateError> {
        let acceptor = Acceptor::new(listener).map_err(GateError::Listener)?;

        if let Ok(addr) = acceptor.local_addr() {
            tracing::info!(
                address = %addr,
                pending_timeout_ticks = config.demux.pending_timeout_ticks,
                "Shared-port gate initialized"
            );
        }
        if arm_mode == ArmMode::Always {
            tracing::warn!("No frame boundaries available, demultiplexing every tick");
        }

        let pending = PendingRegistry::new(config.demux.max_pending);
        let engine = HttpEngine::new(config.http.clone());

        Ok(Self {
            config,
            acceptor,
            pending,
            engine,
            resources: WebResources::new(),
            control,
            arm_mode,
            armed: false,
            ticks: 0,
        })
    }

    /// Mark the start of the host's frame. Demultiplexing runs only
    /// inside this window when frame-scoped.
    pub fn frame_begin(&mut self) {
        self.armed = true;
    }

    /// Mark the end of the host's frame.
    pub fn frame_end(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        match self.arm_mode {
            ArmMode::Always => true,
            ArmMode::FrameScoped => self.armed,
        }
    }

    /// The per-tick driver. Accept first, then classify previously
    /// pending sockets, then let the HTTP engine do its own I/O round.
    pub fn process_accept(&mut self) {
        self.ticks += 1;

        if !self.is_armed() {
            self.accept_undemultiplexed();
            return;
        }

        if let Some((stream, peer)) = self.acceptor.accept_one(&mut self.control) {
            if self.pending.is_full() {
                tracing::warn!(
                    peer_addr = %peer,
                    max_pending = self.config.demux.max_pending,
                    "Pending registry full, refusing connection"
                );
            } else {
                self.pending.push(PendingSocket::new(stream, peer));
            }
        }

        self.scan_pending();

        self.engine.pump(&mut self.resources);
    }

    /// Fallback accept path: no classification, every socket goes to
    /// the control backend.
    fn accept_undemultiplexed(&mut self) {
        if let Some((stream, peer)) = self.acceptor.accept_one(&mut self.control) {
            self.acceptor
                .adopt_into_control(stream, peer, &mut self.control);
        }
    }

    /// One reverse-order pass over the pending registry: peek, then
    /// close, defer, evict, or classify each entry.
    fn scan_pending(&mut self) {
        let timeout_ticks = self.config.demux.pending_timeout_ticks;

        for i in (0..self.pending.len()).rev() {
            let mut header = [0u8; SNIFF_LEN];
            let (peeked, peer) = {
                let socket = self.pending.get_mut(i);
                (socket.stream.peek(&mut header), socket.peer)
            };

            match peeked {
                Ok(0) => {
                    tracing::debug!(peer_addr = %peer, "Pending socket closed by peer");
                    drop(self.pending.remove(i));
                }
                Err(e) if e.kind() != io::ErrorKind::WouldBlock => {
                    tracing::debug!(peer_addr = %peer, error = %e, "Pending socket receive error");
                    drop(self.pending.remove(i));
                }
                Ok(n) if n >= SNIFF_LEN => {
                    tracing::trace!(peer_addr = %peer, header = ?header, "Peeked protocol header");
                    let socket = self.pending.remove(i);
                    self.dispatch(socket, &header);
                }
                // Fewer bytes than the classifier needs, or nothing yet.
                _ => {
                    if self.pending.get_mut(i).tick_and_check_timeout(timeout_ticks) {
                        let socket = self.pending.remove(i);
                        tracing::debug!(
                            peer_addr = %socket.peer,
                            elapsed_ticks = socket.elapsed_ticks,
                            "Pending socket timed out"
                        );
                        self.control.notify_failed_attempt(socket.peer);
                    }
                }
            }
        }
    }

    /// Route a classified socket to its consumer. The stream still
    /// holds every byte the peer sent; only a peek happened.
    fn dispatch(&mut self, socket: PendingSocket, header: &[u8]) {
        match classify(header) {
            protocol @ (Protocol::Http | Protocol::Https) => {
                tracing::debug!(
                    peer_addr = %socket.peer,
                    protocol = %protocol,
                    "Gave socket to web server"
                );
                self.engine
                    .adopt(socket.stream, socket.peer, &mut self.resources);
            }
            Protocol::Control => {
                tracing::debug!(peer_addr = %socket.peer, "Gave socket to control server");
                self.acceptor
                    .adopt_into_control(socket.stream, socket.peer, &mut self.control);
            }
            Protocol::Unknown => {
                tracing::debug!(peer_addr = %socket.peer, "Unidentified protocol on socket");
                self.control.notify_failed_attempt(socket.peer);
            }
        }
    }

    /// The extension surface: handler registration, responses, handles.
    pub fn resources(&self) -> &WebResources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut WebResources {
        &mut self.resources
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Drain control-protocol sockets queued for the backend.
    pub fn take_control_sockets(&mut self) -> Vec<AcceptedSocket> {
        self.acceptor.take_accepted()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            ticks: self.ticks,
            pending_sockets: self.pending.len(),
            http_connections: self.engine.connection_count(),
            live_handles: self.resources.handle_count(),
            handler: self.resources.handler_info().map(|(name, _)| name.to_string()),
        }
    }

    /// Tear the gate down: close HTTP connections with their end
    /// notifications, drop the handler, release pending sockets.
    pub fn shutdown(&mut self) {
        self.engine.close_all(&mut self.resources);
        self.resources.clear_handler();
        self.pending.clear();
        tracing::info!(ticks = self.ticks, "Shared-port gate shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullControl;
    impl ControlBackend for NullControl {}

    fn service(arm_mode: ArmMode) -> GateService<NullControl> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        GateService::new(listener, NullControl, GateConfig::default(), arm_mode).unwrap()
    }

    #[test]
    fn frame_scoped_arming_follows_the_frame() {
        let mut gate = service(ArmMode::FrameScoped);
        assert!(!gate.is_armed());
        gate.frame_begin();
        assert!(gate.is_armed());
        gate.frame_end();
        assert!(!gate.is_armed());
    }

    #[test]
    fn always_armed_ignores_frame_calls() {
        let mut gate = service(ArmMode::Always);
        assert!(gate.is_armed());
        gate.frame_end();
        assert!(gate.is_armed());
    }

    #[test]
    fn status_reflects_tick_count() {
        let mut gate = service(ArmMode::Always);
        for _ in 0..3 {
            gate.process_accept();
        }
        let status = gate.status();
        assert_eq!(status.ticks, 3);
        assert_eq!(status.pending_sockets, 0);
        assert!(status.handler.is_none());
    }
}
