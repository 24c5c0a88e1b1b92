//! Standalone host for the shared-port gate.
//!
//! Runs the gate on its own tick loop with a toy control backend, so
//! the whole demultiplexer can be exercised without an embedding
//! application: HTTP requests get the built-in status pages, control
//! frames reach a byte-echo backend, and repeated failed attempts get
//! an address banned.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;

use portmux::config::{load_config, GateConfig};
use portmux::lifecycle::{ArmMode, GateService, GateStatus};
use portmux::net::{AcceptedSocket, ControlBackend, ControlContext};
use portmux::observability::logging;
use portmux::security::Identity;

/// Failed attempts from one address before it is refused outright.
const BAN_THRESHOLD: u32 = 3;

#[derive(Parser)]
#[command(name = "portmux")]
#[command(about = "Shared-port gate for a control protocol and HTTP", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Demultiplex every tick instead of only inside the frame window.
    #[arg(long)]
    always_armed: bool,
}

/// Demo control backend: echoes bytes back, tracks failed attempts per
/// address, and refuses banned peers at admission time.
struct EchoControl {
    sessions: Vec<ControlSession>,
    failed_attempts: HashMap<IpAddr, u32>,
}

struct ControlSession {
    stream: TcpStream,
    peer: SocketAddr,
    context: Option<ControlContext>,
}

impl EchoControl {
    fn new() -> Self {
        Self {
            sessions: Vec::new(),
            failed_attempts: HashMap::new(),
        }
    }

    fn adopt_all(&mut self, sockets: Vec<AcceptedSocket>) {
        for socket in sockets {
            tracing::info!(peer_addr = %socket.peer, "Control session opened");
            self.sessions.push(ControlSession {
                stream: socket.stream,
                peer: socket.peer,
                context: socket.context,
            });
        }
    }

    /// One non-blocking echo round over every session.
    fn pump(&mut self) {
        let mut chunk = [0u8; 1024];
        for i in (0..self.sessions.len()).rev() {
            let session = &mut self.sessions[i];
            let closed = match session.stream.read(&mut chunk) {
                Ok(0) => true,
                Ok(n) => session.stream.write_all(&chunk[..n]).is_err(),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
                Err(_) => true,
            };

            if closed {
                let session = self.sessions.remove(i);
                self.on_socket_closed(session.peer, session.context);
            }
        }
    }
}

impl ControlBackend for EchoControl {
    fn should_accept(&mut self, _stream: &TcpStream, peer: SocketAddr) -> bool {
        let banned = self
            .failed_attempts
            .get(&peer.ip())
            .is_some_and(|count| *count >= BAN_THRESHOLD);
        if banned {
            tracing::warn!(peer_addr = %peer, "Refusing banned address");
        }
        !banned
    }

    fn on_socket_adopted(&mut self, _peer: SocketAddr) -> Option<ControlContext> {
        Some(Box::new(Instant::now()))
    }

    fn on_socket_closed(&mut self, peer: SocketAddr, context: Option<ControlContext>) {
        let opened = context.and_then(|c| c.downcast::<Instant>().ok());
        match opened {
            Some(instant) => tracing::info!(
                peer_addr = %peer,
                session_secs = instant.elapsed().as_secs(),
                "Control session closed"
            ),
            None => tracing::info!(peer_addr = %peer, "Control session closed"),
        }
    }

    fn notify_failed_attempt(&mut self, peer: SocketAddr) {
        let count = self.failed_attempts.entry(peer.ip()).or_insert(0);
        *count += 1;
        tracing::warn!(peer_addr = %peer, attempts = *count, "Failed connection attempt");
    }
}

/// Create, decorate, queue, and release one response. Returns false on
/// any handle failure so the dispatcher serves the fixed 500 page.
fn serve(
    scope: &mut portmux::http::RequestScope<'_>,
    connection: portmux::security::HandleId,
    status: u16,
    content_type: &str,
    body: &str,
) -> bool {
    let response = scope.string_response(body);
    let queued = scope.add_header(response, "Content-Type", content_type).is_ok()
        && scope.queue_response(connection, status, response).is_ok();
    let _ = scope.free(response);
    queued
}

fn status_page(status: &GateStatus) -> String {
    serde_json::to_string_pretty(status).unwrap_or_else(|_| "{}".to_string())
}

fn index_page() -> String {
    "<!DOCTYPE html>\n<html><body>\
     <h1>portmux</h1>\
     <p>This port also serves the control protocol.</p>\
     <p><a href=\"/status\">status</a></p>\
     </body></html>"
        .to_string()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tick_interval_ms = config.host.tick_interval_ms,
        "portmux starting"
    );

    let listener = TcpListener::bind(&config.listener.bind_address)?;
    let tick_interval = Duration::from_millis(config.host.tick_interval_ms);
    let arm_mode = if cli.always_armed {
        ArmMode::Always
    } else {
        ArmMode::FrameScoped
    };

    let mut gate = GateService::new(listener, EchoControl::new(), config, arm_mode)?;

    // Snapshot shared with the request handler, refreshed every tick.
    let status_shared = Arc::new(Mutex::new(gate.status()));

    let identity = Identity::new();
    let status = Arc::clone(&status_shared);
    let _handler_token = gate.resources_mut().register_request_handler(
        identity,
        "portmux-status",
        Box::new(move |scope, connection, method, url| {
            if let Ok(address) = scope.client_address(connection) {
                tracing::debug!(client = %address, method, url, "Serving status request");
            }

            if method != "GET" {
                return serve(scope, connection, 405, "text/plain", "method not allowed\n");
            }

            match url {
                "/" => serve(scope, connection, 200, "text/html", &index_page()),
                "/status" => {
                    let body = match status.lock() {
                        Ok(snapshot) => status_page(&snapshot),
                        Err(_) => "{}".to_string(),
                    };
                    serve(scope, connection, 200, "application/json", &body)
                }
                _ => serve(scope, connection, 404, "text/plain", "not found\n"),
            }
        }),
        "portmux-status",
        "Built-in status pages",
    );

    loop {
        let tick_start = Instant::now();

        gate.frame_begin();
        gate.process_accept();
        gate.frame_end();

        let adopted = gate.take_control_sockets();
        gate.control_mut().adopt_all(adopted);
        gate.control_mut().pump();

        if let Ok(mut snapshot) = status_shared.lock() {
            *snapshot = gate.status();
        }

        if let Some(remaining) = tick_interval.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}
