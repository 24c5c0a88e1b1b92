//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parseable)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GateConfig;

/// A single semantic validation failure.
#[derive(Debug)]
pub enum ValidationError {
    /// Bind address does not parse as host:port.
    InvalidBindAddress(String),
    /// A numeric field that must be positive is zero.
    ZeroField(&'static str),
    /// Header budget too small to hold a request line.
    HeaderBudgetTooSmall(usize),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "listener.bind_address {:?} is not a valid socket address", addr)
            }
            ValidationError::ZeroField(name) => write!(f, "{} must be greater than zero", name),
            ValidationError::HeaderBudgetTooSmall(n) => {
                write!(f, "http.max_header_bytes {} is below the 512 byte minimum", n)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.demux.pending_timeout_ticks == 0 {
        errors.push(ValidationError::ZeroField("demux.pending_timeout_ticks"));
    }
    if config.demux.max_pending == 0 {
        errors.push(ValidationError::ZeroField("demux.max_pending"));
    }
    if config.http.max_connections == 0 {
        errors.push(ValidationError::ZeroField("http.max_connections"));
    }
    if config.http.max_header_bytes < 512 {
        errors.push(ValidationError::HeaderBudgetTooSmall(config.http.max_header_bytes));
    }
    if config.host.tick_interval_ms == 0 {
        errors.push(ValidationError::ZeroField("host.tick_interval_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GateConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GateConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.demux.pending_timeout_ticks = 0;
        config.http.max_header_bytes = 16;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
