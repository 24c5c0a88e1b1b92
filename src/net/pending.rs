//! Registry of accepted-but-unclassified sockets.
//!
//! A socket sits here from the moment the OS hands it to us until its
//! first bytes identify a protocol, the peer gives up, or it times out.
//! Each entry is owned exclusively by the registry; handoff moves the
//! stream out and drops the entry.

use std::net::{SocketAddr, TcpStream};

/// An accepted socket awaiting classification.
#[derive(Debug)]
pub struct PendingSocket {
    /// Non-blocking stream, tuned at accept time.
    pub stream: TcpStream,
    /// Normalized remote address.
    pub peer: SocketAddr,
    /// Ticks spent unclassified. Monotonic until eviction.
    pub elapsed_ticks: u32,
}

impl PendingSocket {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            elapsed_ticks: 0,
        }
    }

    /// Count one more tick without enough bytes to classify. Returns
    /// true once the elapsed count strictly exceeds `timeout_ticks`.
    pub fn tick_and_check_timeout(&mut self, timeout_ticks: u32) -> bool {
        self.elapsed_ticks += 1;
        self.elapsed_ticks > timeout_ticks
    }
}

/// Holds pending sockets in insertion order.
///
/// The driver scans this in reverse index order so entries can be
/// removed in place without disturbing the positions still to visit.
#[derive(Debug)]
pub struct PendingRegistry {
    entries: Vec<PendingSocket>,
    capacity: usize,
}

impl PendingRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// True when no further sockets may be admitted this tick.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, socket: PendingSocket) {
        self.entries.push(socket);
    }

    pub fn get_mut(&mut self, index: usize) -> &mut PendingSocket {
        &mut self.entries[index]
    }

    /// Remove and return the entry at `index`, preserving the order of
    /// the remaining entries.
    pub fn remove(&mut self, index: usize) -> PendingSocket {
        self.entries.remove(index)
    }

    /// Drop every pending socket. Used at teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
