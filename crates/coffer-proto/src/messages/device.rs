//! Session, settings and confirmation payloads.

use serde::{Deserialize, Serialize};

use crate::FailureCode;

/// Reply to `Initialize`: everything the host needs to know about the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Vendor string, e.g. `"keepkey.com"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Firmware major version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_version: Option<u32>,
    /// Firmware minor version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_version: Option<u32>,
    /// Firmware patch version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_version: Option<u32>,
    /// True when answered by the bootloader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootloader_mode: Option<bool>,
    /// Device UUID rendered as hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// True when a PIN is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_protection: Option<bool>,
    /// True when a passphrase is required for key derivation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
    /// Display language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// User-chosen device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// True when a seed is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialized: Option<bool>,
    /// True when the seed was imported rather than generated on-device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported: Option<bool>,
    /// Supported coins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coins: Vec<CoinInfo>,
    /// Policy flags with their current state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyInfo>,
}

/// One supported coin, as advertised in `Features`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinInfo {
    /// Full name, e.g. `"Bitcoin"`.
    pub coin_name: String,
    /// Ticker, e.g. `"BTC"`.
    pub coin_shortcut: String,
    /// Base58 version byte for pay-to-pubkey-hash.
    pub address_type: u32,
    /// Base58 version byte for pay-to-script-hash.
    pub address_type_p2sh: u32,
    /// Fee-per-kilobyte warning threshold in base units.
    pub maxfee_kb: u64,
    /// True when the coin supports segwit spends.
    pub segwit: bool,
    /// Bech32 human-readable part, when native segwit is supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bech32_hrp: Option<String>,
}

/// One feature-policy flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    /// Policy name.
    pub policy_name: String,
    /// Current state.
    pub enabled: bool,
}

/// Liveness check, optionally exercising the protection gates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Text echoed back in the `Success` reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Require a confirmation hold before replying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_protection: Option<bool>,
    /// Require PIN entry before replying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_protection: Option<bool>,
    /// Require a passphrase before replying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_protection: Option<bool>,
}

/// Generic success reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success {
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generic failure reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Machine-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why the device is asking for a physical confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ButtonRequestType {
    Other,
    FeeOverThreshold,
    ConfirmOutput,
    ResetDevice,
    ConfirmWord,
    WipeDevice,
    ProtectCall,
    SignTx,
    FirmwareCheck,
    FirmwareErase,
    Address,
    ConfirmTransferToAccount,
    ConfirmExchange,
}

/// Sent before the device blocks on a press-and-hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRequest {
    /// What kind of action awaits confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ButtonRequestType>,
}

/// Which PIN the scrambled matrix is collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum PinMatrixRequestType {
    Current,
    NewFirst,
    NewSecond,
}

/// Ask the host to relay scrambled-matrix positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMatrixRequest {
    /// Which PIN is being collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PinMatrixRequestType>,
}

/// Matrix positions the user selected on the host keyboard.
///
/// These are positions on the device-displayed scrambled grid, never the
/// actual digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMatrixAck {
    /// Position characters `'1'..='9'`.
    pub pin: String,
}

/// Passphrase typed on the host keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassphraseAck {
    /// The passphrase. Cached only for the session.
    pub passphrase: String,
}

/// Change, set or remove the device PIN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePin {
    /// True to remove PIN protection instead of changing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<bool>,
}

/// Update label, language or passphrase protection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySettings {
    /// New display language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// New device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Enable or disable passphrase protection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_passphrase: Option<bool>,
}

/// Request hardware RNG output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEntropy {
    /// Number of bytes requested.
    pub size: u32,
}

/// Hardware RNG output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entropy {
    /// Random bytes, at most the device buffer size.
    #[serde(with = "serde_bytes")]
    pub entropy: Vec<u8>,
}
