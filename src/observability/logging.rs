//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem once, at host startup
//! - Respect RUST_LOG when set, falling back to the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. Called once by the hosting
/// binary; embedded hosts that already installed a subscriber skip
/// this.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("portmux={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
