//! Shared utilities for integration testing.
//!
//! Tests drive the gate deterministically: the service lives on the
//! test thread and ticks happen by explicit `process_accept` calls,
//! with raw `TcpStream` clients on the other end of the loopback.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portmux::config::GateConfig;
use portmux::lifecycle::{ArmMode, GateService};
use portmux::net::{ControlBackend, ControlContext};

/// Everything the control backend observed.
#[derive(Debug, Default)]
pub struct ControlLog {
    pub adopted: Vec<SocketAddr>,
    pub failed: Vec<SocketAddr>,
    pub refused: Vec<SocketAddr>,
}

/// Control backend that records every interaction.
pub struct RecordingControl {
    pub log: Arc<Mutex<ControlLog>>,
    pub refuse_all: bool,
}

impl ControlBackend for RecordingControl {
    fn should_accept(&mut self, _stream: &TcpStream, peer: SocketAddr) -> bool {
        if self.refuse_all {
            self.log.lock().unwrap().refused.push(peer);
            return false;
        }
        true
    }

    fn on_socket_adopted(&mut self, peer: SocketAddr) -> Option<ControlContext> {
        self.log.lock().unwrap().adopted.push(peer);
        Some(Box::new(peer))
    }

    fn notify_failed_attempt(&mut self, peer: SocketAddr) {
        self.log.lock().unwrap().failed.push(peer);
    }
}

/// Gate on an ephemeral loopback port, armed by the caller's ticks.
pub fn build_gate(
    config: GateConfig,
    refuse_all: bool,
) -> (GateService<RecordingControl>, Arc<Mutex<ControlLog>>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(ControlLog::default()));
    let control = RecordingControl {
        log: Arc::clone(&log),
        refuse_all,
    };
    let gate = GateService::new(listener, control, config, ArmMode::FrameScoped).unwrap();
    (gate, log, addr)
}

/// One full host tick: arm, drive, disarm.
pub fn tick(gate: &mut GateService<RecordingControl>) {
    gate.frame_begin();
    gate.process_accept();
    gate.frame_end();
}

/// Connect a raw client with a short read timeout.
pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(5)))
        .unwrap();
    stream
}

/// Tick the gate until the client observes end-of-stream.
#[allow(dead_code)]
pub fn tick_until_eof(gate: &mut GateService<RecordingControl>, client: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 256];
    for _ in 0..200 {
        tick(gate);
        match client.read(&mut chunk) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(_) => {}
        }
    }
    false
}

/// Tick the gate while collecting the client's bytes until the peer
/// closes or the response stops growing.
#[allow(dead_code)]
pub fn tick_and_collect(gate: &mut GateService<RecordingControl>, client: &mut TcpStream) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 1024];
    let mut quiet_rounds = 0;

    for _ in 0..400 {
        tick(gate);
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                quiet_rounds = 0;
            }
            Err(_) => {
                quiet_rounds += 1;
                if !collected.is_empty() && quiet_rounds > 10 {
                    break;
                }
            }
        }
    }
    collected
}
