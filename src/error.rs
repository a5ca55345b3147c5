//! # Error Types
//!
//! Custom error types for FC Link using `thiserror`.
//!
//! Byte-level corruption ([`FramingError`]) is recovered inside the parsers and
//! only ever logged or counted. Command-level failures ([`MspError`]) and
//! synchronous argument errors ([`DecodeError`]) reach the caller.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for FC Link
#[derive(Debug, Error)]
pub enum FcLinkError {
    /// MSP command errors
    #[error("MSP error: {0}")]
    Msp(#[from] MspError),

    /// Payload decode / argument errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No usable serial device among the candidate paths
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Telemetry serialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Errors surfaced by an MSP command round trip.
#[derive(Debug, Error)]
pub enum MspError {
    /// The transport reported an I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The transport is not open
    #[error("transport is closed")]
    TransportClosed,

    /// No complete response arrived before the deadline
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Bytes arrived but none of them formed a valid response before the deadline
    #[error("lost frame sync: {discarded} bytes discarded without a valid response")]
    Desync {
        /// Bytes thrown away while scanning for a header
        discarded: usize,
    },

    /// The device answered with an MSP error frame (`$M!`)
    #[error("device rejected command {command}")]
    Rejected {
        /// Command code echoed by the device
        command: u8,
    },

    /// The request could not be encoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors returned synchronously by encode/decode helpers and accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload does not have the size the decoder needs
    #[error("invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidPayloadLength {
        /// Required length in bytes
        expected: usize,
        /// Received length in bytes
        actual: usize,
    },

    /// Payload exceeds what the frame format can carry
    #[error("payload size {len} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Offending payload length
        len: usize,
        /// Largest accepted payload length
        max: usize,
    },

    /// Index outside the accepted range
    #[error("index {0} is out of range")]
    OutOfRange(usize),
}

/// Framing and integrity failures recovered locally by resynchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The leading byte is not a frame start
    #[error("unexpected byte 0x{0:02X} at frame start")]
    Desync(u8),

    /// Fewer bytes than the length field announces
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the header announces
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// The length field is outside the accepted range
    #[error("invalid length byte {0}")]
    LengthInvalid(u8),

    /// CRSF CRC8 mismatch
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Crc {
        /// CRC computed over the received bytes
        expected: u8,
        /// CRC carried by the frame
        actual: u8,
    },

    /// MSP checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum carried by the frame
        actual: u8,
    },
}

/// Result type alias for FC Link
pub type Result<T> = std::result::Result<T, FcLinkError>;
