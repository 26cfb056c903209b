//! Protocol-layer error types.
//!
//! These cover structural problems with packets and payload encoding. They
//! never carry device state; the device maps them onto wire `Failure`
//! replies where the contract requires one.

use thiserror::Error;

/// Errors produced while framing, reassembling or (de)serializing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet shorter than the minimum first-frame header.
    #[error("runt packet: {len} bytes, need at least {min}")]
    RuntPacket {
        /// Observed packet length.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
    },

    /// Report marker byte was not `'?'`.
    #[error("invalid report marker: {0:#04x}")]
    InvalidReportMarker(u8),

    /// Declared payload length exceeds the compile-time maximum.
    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Type code does not name any known message.
    #[error("unknown message type: {0:#06x}")]
    UnknownType(u16),

    /// Payload bytes did not decode as the schema for the given type.
    #[error("payload decode failed for {message_type:?}: {reason}")]
    Decode {
        /// Message type being decoded.
        message_type: crate::MessageType,
        /// Human-readable decoder diagnostic.
        reason: String,
    },

    /// Payload serialization failed.
    #[error("payload encode failed: {0}")]
    Encode(String),
}
