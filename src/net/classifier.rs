//! Wire-protocol classification from peeked bytes.
//!
//! Decides, from the first bytes a client sends, whether a connection
//! carries HTTP, a TLS handshake, or the control protocol. The bytes are
//! obtained with a non-destructive peek, so classification never consumes
//! anything from the stream.

/// Bytes required to tell the protocols apart.
pub const SNIFF_LEN: usize = 12;

/// Result of classifying a connection's opening bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plaintext HTTP request.
    Http,
    /// TLS handshake (detected, never decrypted).
    Https,
    /// Control-protocol frame.
    Control,
    /// None of the known patterns.
    Unknown,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Control => write!(f, "control"),
            Protocol::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify the first [`SNIFF_LEN`] bytes of a connection.
///
/// Pure function: same input, same answer, no side effects. HTTP and
/// HTTPS are checked before the control protocol; the byte layouts make
/// the patterns mutually exclusive.
pub fn classify(header: &[u8]) -> Protocol {
    if header.len() < SNIFF_LEN {
        return Protocol::Unknown;
    }

    if is_http(header) {
        Protocol::Http
    } else if is_https(header) {
        Protocol::Https
    } else if is_control(header) {
        Protocol::Control
    } else {
        Protocol::Unknown
    }
}

/// Three leading ASCII letters approximate an HTTP method token
/// (GET, POST, PUT, ...).
fn is_http(header: &[u8]) -> bool {
    header[..3].iter().all(|b| b.is_ascii_alphabetic())
}

/// TLS record header carrying a ClientHello.
///
/// - Byte 0: content type (0x16 = handshake)
/// - Byte 1: record version major (0x03)
/// - Bytes 3-4: record length (big-endian)
/// - Byte 5: handshake type (0x01 = ClientHello)
/// - Bytes 7-8: low bytes of the handshake length
///
/// The record payload is the 4-byte handshake header plus the handshake
/// body, so record length must equal handshake length + 4.
fn is_https(header: &[u8]) -> bool {
    let record_len = u16::from_be_bytes([header[3], header[4]]) as u32;
    let handshake_len = u16::from_be_bytes([header[7], header[8]]) as u32;

    header[0] == 0x16
        && header[1] == 0x03
        && header[5] == 0x01
        && header[6] == 0x00
        && record_len == handshake_len + 4
}

/// Control-protocol frame: zero-valued size high bytes at offsets 2-3
/// and the 4-byte authentication command tag at offsets 8-11.
fn is_control(header: &[u8]) -> bool {
    header[2] == 0x00
        && header[3] == 0x00
        && header[8] == 0x03
        && header[9] == 0x00
        && header[10] == 0x00
        && header[11] == 0x00
}
