//! DebugLink payloads, compiled in only with the `debug-link` feature.
//!
//! These expose internal state for the test harness. Production firmware
//! must never carry them.

use serde::{Deserialize, Serialize};

use super::keys::HdNodeType;

/// Simulated button decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLinkDecision {
    /// True to confirm, false to abort.
    pub yes_no: bool,
}

/// Internal device state, for tests only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLinkState {
    /// The stored PIN, plain digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    /// The scrambled matrix currently displayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<String>,
    /// The stored mnemonic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    /// The stored node, when the seed is a raw node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<HdNodeType>,
    /// Passphrase protection flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
    /// The recovery cipher currently displayed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_cipher: Option<String>,
    /// SHA-256 of the flashed application image.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub firmware_hash: Option<Vec<u8>>,
    /// SHA-256 of the active storage sector.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub storage_hash: Option<Vec<u8>>,
}
