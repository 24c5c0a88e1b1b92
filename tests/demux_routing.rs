//! Integration tests for the connection demultiplexer: classification
//! routing, admission, eviction, and timeout behavior on real loopback
//! sockets.

use std::io::{Read, Write};

use portmux::config::GateConfig;

mod common;
use common::{build_gate, connect, tick, tick_and_collect, tick_until_eof};

/// Control-protocol authentication preamble: little-endian frame size
/// with zero high bytes, then the command tag 03 00 00 00 at offset 8.
const CONTROL_PREAMBLE: [u8; 12] = [
    0x11, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
];

#[test]
fn control_sockets_reach_backend_with_bytes_intact() {
    let (mut gate, log, addr) = build_gate(GateConfig::default(), false);

    let mut client = connect(addr);
    client.write_all(&CONTROL_PREAMBLE).unwrap();

    // Tick until the socket is classified and handed over.
    let mut handed = Vec::new();
    for _ in 0..200 {
        tick(&mut gate);
        handed = gate.take_control_sockets();
        if !handed.is_empty() {
            break;
        }
    }
    assert_eq!(handed.len(), 1);
    assert_eq!(log.lock().unwrap().adopted.len(), 1);

    // Peeking never consumed anything: the backend reads the full
    // original preamble.
    let mut received = [0u8; 12];
    let accepted = &mut handed[0];
    accepted.stream.set_nonblocking(false).unwrap();
    accepted.stream.read_exact(&mut received).unwrap();
    assert_eq!(received, CONTROL_PREAMBLE);

    // The opaque context survived the handoff.
    assert!(accepted.context.is_some());
}

#[test]
fn unknown_protocol_is_closed_and_reported() {
    let (mut gate, log, addr) = build_gate(GateConfig::default(), false);

    let mut client = connect(addr);
    client.write_all(&[0xAAu8; 12]).unwrap();

    assert!(tick_until_eof(&mut gate, &mut client), "socket not closed");
    let log = log.lock().unwrap();
    assert_eq!(log.failed.len(), 1);
    assert!(log.adopted.is_empty());
    assert_eq!(gate.status().http_connections, 0);
}

#[test]
fn https_client_hello_goes_to_the_web_server() {
    let (mut gate, log, addr) = build_gate(GateConfig::default(), false);

    let mut client = connect(addr);
    // TLS record: length 0x0010 = handshake length 0x000C + 4.
    let hello = [
        0x16, 0x03, 0x01, 0x00, 0x10, 0x01, 0x00, 0x00, 0x0C, 0x03, 0x03, 0x00,
    ];
    client.write_all(&hello).unwrap();

    // The engine does not terminate TLS, so the observable proof of
    // routing is its plaintext protocol error reply.
    let reply = tick_and_collect(&mut gate, &mut client);
    let reply = String::from_utf8_lossy(&reply);
    assert!(reply.starts_with("HTTP/1.1 400"), "reply: {reply}");
    assert!(log.lock().unwrap().adopted.is_empty());
}

#[test]
fn silent_connection_evicted_exactly_past_threshold() {
    let mut config = GateConfig::default();
    config.demux.pending_timeout_ticks = 5;
    let (mut gate, log, addr) = build_gate(config, false);

    let mut client = connect(addr);
    // Three bytes are not enough to classify.
    client.write_all(b"abc").unwrap();

    // Tick until the acceptor has admitted the socket; that first scan
    // already counted one elapsed tick.
    let mut accepted = false;
    for _ in 0..200 {
        tick(&mut gate);
        if gate.status().pending_sockets == 1 {
            accepted = true;
            break;
        }
    }
    assert!(accepted, "socket never entered the pending registry");

    // Four more short ticks reach the threshold without eviction.
    for _ in 0..4 {
        tick(&mut gate);
    }
    assert_eq!(gate.status().pending_sockets, 1);
    assert!(log.lock().unwrap().failed.is_empty());

    // The next tick strictly exceeds the threshold.
    tick(&mut gate);
    assert_eq!(gate.status().pending_sockets, 0);
    assert_eq!(log.lock().unwrap().failed.len(), 1);

    // The peer observes the close.
    let mut chunk = [0u8; 16];
    let eof = (0..100).any(|_| matches!(client.read(&mut chunk), Ok(0)));
    assert!(eof, "client never observed the eviction");
}

#[test]
fn refused_admission_never_enters_the_registry() {
    let (mut gate, log, addr) = build_gate(GateConfig::default(), true);

    let mut client = connect(addr);
    client.write_all(&CONTROL_PREAMBLE).unwrap();

    assert!(tick_until_eof(&mut gate, &mut client), "socket not closed");
    let log = log.lock().unwrap();
    assert_eq!(log.refused.len(), 1);
    assert!(log.adopted.is_empty());
    assert_eq!(gate.status().pending_sockets, 0);
}

#[test]
fn unarmed_gate_falls_back_to_control_accept() {
    let (mut gate, log, addr) = build_gate(GateConfig::default(), false);

    // An HTTP client connects, but the gate is never armed: the socket
    // must go straight to the control backend, unclassified.
    let mut client = connect(addr);
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

    let mut handed = Vec::new();
    for _ in 0..200 {
        gate.process_accept();
        handed = gate.take_control_sockets();
        if !handed.is_empty() {
            break;
        }
    }
    assert_eq!(handed.len(), 1);
    assert_eq!(log.lock().unwrap().adopted.len(), 1);
    assert_eq!(gate.status().pending_sockets, 0);
    assert_eq!(gate.status().http_connections, 0);
}

#[test]
fn pending_registry_capacity_refuses_overflow() {
    let mut config = GateConfig::default();
    config.demux.max_pending = 1;
    config.demux.pending_timeout_ticks = 10_000;
    let (mut gate, _log, addr) = build_gate(config, false);

    // Fill the registry with one silent client first.
    let _first = connect(addr);
    for _ in 0..200 {
        tick(&mut gate);
        if gate.status().pending_sockets == 1 {
            break;
        }
    }
    assert_eq!(gate.status().pending_sockets, 1);

    // A second silent client no longer fits.
    let mut second = connect(addr);
    for _ in 0..50 {
        tick(&mut gate);
    }
    assert_eq!(gate.status().pending_sockets, 1);

    // The overflow socket was closed outright.
    let mut chunk = [0u8; 16];
    let eof = (0..100).any(|_| {
        tick(&mut gate);
        matches!(second.read(&mut chunk), Ok(0))
    });
    assert!(eof, "overflow client never observed the refusal");
}
