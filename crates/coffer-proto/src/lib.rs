//! Wire protocol for the Coffer hardware wallet.
//!
//! The host talks to the device over fixed 64-byte HID packets. The first
//! packet of a message carries a 6-byte header (preamble, big-endian type
//! code, big-endian payload length); continuation packets carry only the
//! report marker plus raw payload bytes. Payloads are typed records selected
//! by the type code in the header.
//!
//! This crate is pure data: packet layout ([`frame`]), the
//! reassembly/segmentation state machine ([`framer`]), the message type
//! registry ([`types`]), the typed payloads ([`messages`]) and the failure
//! code vocabulary ([`failure`]). No device state lives here.

pub mod failure;
pub mod frame;
pub mod framer;
pub mod messages;
pub mod types;

mod errors;

pub use errors::ProtocolError;
pub use failure::FailureCode;
pub use frame::{Packet, FRAME_SIZE, REPORT_MARKER};
pub use framer::{Framer, FramerEvent, FramerStats};
pub use messages::Message;
pub use types::{MessageClass, MessageType};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
