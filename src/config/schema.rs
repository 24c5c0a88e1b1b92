//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the shared-port gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Demultiplexer settings (pending sockets, classification timeout).
    pub demux: DemuxConfig,

    /// Embedded HTTP engine settings.
    pub http: HttpConfig,

    /// Host tick loop settings (standalone binary only).
    pub host: HostConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for the shared port (e.g., "0.0.0.0:27015").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:27015".to_string(),
        }
    }
}

/// Demultiplexer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Ticks an unclassified socket may stay pending before eviction.
    /// At the default host tick rate this is roughly 15 seconds.
    pub pending_timeout_ticks: u32,

    /// Maximum sockets held in the pending registry at once. New
    /// connections are refused while the registry is full.
    pub max_pending: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ticks: 1000,
            max_pending: 64,
        }
    }
}

/// Embedded HTTP engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum concurrent HTTP connections adopted by the engine.
    pub max_connections: usize,

    /// Maximum bytes of request head (request line + headers).
    pub max_header_bytes: usize,

    /// Ticks a connection may sit idle before the engine reaps it.
    /// Zero disables idle reaping.
    pub idle_timeout_ticks: u32,

    /// Value of the `Server` response header. Empty string disables it.
    pub server_header: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_header_bytes: 8 * 1024,
            idle_timeout_ticks: 2000,
            server_header: "portmux".to_string(),
        }
    }
}

/// Host tick loop configuration, used by the standalone binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Milliseconds between ticks. The default approximates a 66 Hz
    /// frame loop, which the pending timeout is tuned against.
    pub tick_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 15,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
