//! Seed provisioning payloads: load, generate, recover.

use serde::{Deserialize, Serialize};

use super::keys::HdNodeType;

/// Import a seed directly. Test and migration use only; marks the device
/// as `imported`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDevice {
    /// BIP-39 mnemonic sentence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    /// Raw BIP-32 node, alternative to the mnemonic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<HdNodeType>,
    /// PIN to set, plain digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    /// Enable passphrase protection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
    /// Display language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Skip the mnemonic checksum test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_checksum: Option<bool>,
}

/// Generate a fresh seed on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetDevice {
    /// Show the internal entropy on the display before mixing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_random: Option<bool>,
    /// Seed strength in bits: 128, 192 or 256.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<u32>,
    /// Enable passphrase protection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
    /// Ask for a PIN during setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_protection: Option<bool>,
    /// Display language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Host-side entropy contribution for seed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyAck {
    /// At least 32 bytes of host entropy.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub entropy: Option<Vec<u8>>,
}

/// Begin seed recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDevice {
    /// Number of words in the mnemonic (12, 18 or 24).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
    /// Enable passphrase protection afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
    /// Ask for a PIN during recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_protection: Option<bool>,
    /// Display language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Reject words outside the BIP-39 wordlist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce_wordlist: Option<bool>,
    /// Use the on-screen substitution cipher instead of word entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_character_cipher: Option<bool>,
}

/// One recovered word, typed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordAck {
    /// The word.
    pub word: String,
}

/// Ask for the next ciphered character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRequest {
    /// Word currently being entered, zero-based.
    pub word_pos: u32,
    /// Position within that word, zero-based.
    pub character_pos: u32,
}

/// One ciphered character (or a space ending the current word).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAck {
    /// A single cipher character `a..z`, or `' '`.
    pub character: String,
}
