//! Typed message payloads.
//!
//! The type code in the first packet selects the payload schema, so the
//! encoding carries only the record itself, never a variant tag. Optional
//! fields are `Option` and are omitted from the wire when absent. Messages
//! with no fields encode as zero bytes.
//!
//! # Invariants
//!
//! - Each variant maps to exactly one [`MessageType`] (enforced by match
//!   exhaustiveness in `message_type()`).
//! - `decode(ty, encode(m)) == m` for every message. Verified by round-trip
//!   tests.

pub mod cosmos;
pub mod device;
pub mod ethereum;
pub mod keys;
pub mod provision;
pub mod tx;

#[cfg(feature = "debug-link")]
pub mod debug;

use bytes::BufMut;
use serde::{de::DeserializeOwned, Serialize};

use crate::{MessageType, ProtocolError, Result};

fn enc<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    let mut writer = dst.writer();
    ciborium::ser::into_writer(value, &mut writer)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn dec<T: DeserializeOwned>(message_type: MessageType, bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes)
        .map_err(|e| ProtocolError::Decode { message_type, reason: e.to_string() })
}

/// Every message the device can receive or send.
///
/// Raw messages (`FirmwareUpload`) have no variant here; their payloads
/// bypass decoding entirely and stream to their handler as byte segments.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Message {
    // Session and settings
    Initialize,
    Ping(device::Ping),
    Success(device::Success),
    Failure(device::Failure),
    Features(Box<device::Features>),
    ChangePin(device::ChangePin),
    WipeDevice,
    ApplySettings(device::ApplySettings),
    ClearSession,
    Cancel,
    GetEntropy(device::GetEntropy),
    Entropy(device::Entropy),
    ButtonRequest(device::ButtonRequest),
    ButtonAck,
    PinMatrixRequest(device::PinMatrixRequest),
    PinMatrixAck(device::PinMatrixAck),
    PassphraseRequest,
    PassphraseAck(device::PassphraseAck),

    // Keys, addresses and message cryptography
    GetPublicKey(keys::GetPublicKey),
    PublicKey(keys::PublicKey),
    GetAddress(keys::GetAddress),
    Address(keys::Address),
    SignMessage(keys::SignMessage),
    VerifyMessage(keys::VerifyMessage),
    MessageSignature(keys::MessageSignature),
    EncryptMessage(keys::EncryptMessage),
    EncryptedMessage(keys::EncryptedMessage),
    DecryptMessage(keys::DecryptMessage),
    DecryptedMessage(keys::DecryptedMessage),
    CipherKeyValue(keys::CipherKeyValue),
    CipheredKeyValue(keys::CipheredKeyValue),

    // Provisioning
    LoadDevice(provision::LoadDevice),
    ResetDevice(provision::ResetDevice),
    EntropyRequest,
    EntropyAck(provision::EntropyAck),
    RecoveryDevice(provision::RecoveryDevice),
    WordRequest,
    WordAck(provision::WordAck),
    CharacterRequest(provision::CharacterRequest),
    CharacterAck(provision::CharacterAck),
    CharacterDeleteAck,
    CharacterFinalAck,

    // Bitcoin-family signing
    SignTx(tx::SignTx),
    TxRequest(tx::TxRequest),
    TxAck(tx::TxAck),
    EstimateTxSize(tx::EstimateTxSize),
    TxSize(tx::TxSize),

    // Firmware
    FirmwareErase,

    // Ethereum
    EthereumGetAddress(ethereum::EthereumGetAddress),
    EthereumAddress(ethereum::EthereumAddress),
    EthereumSignTx(Box<ethereum::EthereumSignTx>),
    EthereumTxRequest(ethereum::EthereumTxRequest),
    EthereumTxAck(ethereum::EthereumTxAck),
    EthereumSignMessage(ethereum::EthereumSignMessage),
    EthereumVerifyMessage(ethereum::EthereumVerifyMessage),
    EthereumMessageSignature(ethereum::EthereumMessageSignature),

    // Cosmos
    CosmosSignTx(cosmos::CosmosSignTx),
    CosmosTxRequest(cosmos::CosmosTxRequest),
    CosmosTxAck(cosmos::CosmosTxAck),
    CosmosSignedTx(cosmos::CosmosSignedTx),

    // Debug link
    #[cfg(feature = "debug-link")]
    DebugLinkDecision(debug::DebugLinkDecision),
    #[cfg(feature = "debug-link")]
    DebugLinkGetState,
    #[cfg(feature = "debug-link")]
    DebugLinkState(Box<debug::DebugLinkState>),
    #[cfg(feature = "debug-link")]
    DebugLinkStop,
    #[cfg(feature = "debug-link")]
    DebugLinkFillConfig,
}

impl Message {
    /// Wire type code for this message.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Initialize => MessageType::Initialize,
            Self::Ping(_) => MessageType::Ping,
            Self::Success(_) => MessageType::Success,
            Self::Failure(_) => MessageType::Failure,
            Self::Features(_) => MessageType::Features,
            Self::ChangePin(_) => MessageType::ChangePin,
            Self::WipeDevice => MessageType::WipeDevice,
            Self::ApplySettings(_) => MessageType::ApplySettings,
            Self::ClearSession => MessageType::ClearSession,
            Self::Cancel => MessageType::Cancel,
            Self::GetEntropy(_) => MessageType::GetEntropy,
            Self::Entropy(_) => MessageType::Entropy,
            Self::ButtonRequest(_) => MessageType::ButtonRequest,
            Self::ButtonAck => MessageType::ButtonAck,
            Self::PinMatrixRequest(_) => MessageType::PinMatrixRequest,
            Self::PinMatrixAck(_) => MessageType::PinMatrixAck,
            Self::PassphraseRequest => MessageType::PassphraseRequest,
            Self::PassphraseAck(_) => MessageType::PassphraseAck,
            Self::GetPublicKey(_) => MessageType::GetPublicKey,
            Self::PublicKey(_) => MessageType::PublicKey,
            Self::GetAddress(_) => MessageType::GetAddress,
            Self::Address(_) => MessageType::Address,
            Self::SignMessage(_) => MessageType::SignMessage,
            Self::VerifyMessage(_) => MessageType::VerifyMessage,
            Self::MessageSignature(_) => MessageType::MessageSignature,
            Self::EncryptMessage(_) => MessageType::EncryptMessage,
            Self::EncryptedMessage(_) => MessageType::EncryptedMessage,
            Self::DecryptMessage(_) => MessageType::DecryptMessage,
            Self::DecryptedMessage(_) => MessageType::DecryptedMessage,
            Self::CipherKeyValue(_) => MessageType::CipherKeyValue,
            Self::CipheredKeyValue(_) => MessageType::CipheredKeyValue,
            Self::LoadDevice(_) => MessageType::LoadDevice,
            Self::ResetDevice(_) => MessageType::ResetDevice,
            Self::EntropyRequest => MessageType::EntropyRequest,
            Self::EntropyAck(_) => MessageType::EntropyAck,
            Self::RecoveryDevice(_) => MessageType::RecoveryDevice,
            Self::WordRequest => MessageType::WordRequest,
            Self::WordAck(_) => MessageType::WordAck,
            Self::CharacterRequest(_) => MessageType::CharacterRequest,
            Self::CharacterAck(_) => MessageType::CharacterAck,
            Self::CharacterDeleteAck => MessageType::CharacterDeleteAck,
            Self::CharacterFinalAck => MessageType::CharacterFinalAck,
            Self::SignTx(_) => MessageType::SignTx,
            Self::TxRequest(_) => MessageType::TxRequest,
            Self::TxAck(_) => MessageType::TxAck,
            Self::EstimateTxSize(_) => MessageType::EstimateTxSize,
            Self::TxSize(_) => MessageType::TxSize,
            Self::FirmwareErase => MessageType::FirmwareErase,
            Self::EthereumGetAddress(_) => MessageType::EthereumGetAddress,
            Self::EthereumAddress(_) => MessageType::EthereumAddress,
            Self::EthereumSignTx(_) => MessageType::EthereumSignTx,
            Self::EthereumTxRequest(_) => MessageType::EthereumTxRequest,
            Self::EthereumTxAck(_) => MessageType::EthereumTxAck,
            Self::EthereumSignMessage(_) => MessageType::EthereumSignMessage,
            Self::EthereumVerifyMessage(_) => MessageType::EthereumVerifyMessage,
            Self::EthereumMessageSignature(_) => MessageType::EthereumMessageSignature,
            Self::CosmosSignTx(_) => MessageType::CosmosSignTx,
            Self::CosmosTxRequest(_) => MessageType::CosmosTxRequest,
            Self::CosmosTxAck(_) => MessageType::CosmosTxAck,
            Self::CosmosSignedTx(_) => MessageType::CosmosSignedTx,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkDecision(_) => MessageType::DebugLinkDecision,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkGetState => MessageType::DebugLinkGetState,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkState(_) => MessageType::DebugLinkState,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkStop => MessageType::DebugLinkStop,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkFillConfig => MessageType::DebugLinkFillConfig,
        }
    }

    /// Encode the payload. Messages without fields encode to zero bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Initialize
            | Self::WipeDevice
            | Self::ClearSession
            | Self::Cancel
            | Self::ButtonAck
            | Self::PassphraseRequest
            | Self::EntropyRequest
            | Self::WordRequest
            | Self::CharacterDeleteAck
            | Self::CharacterFinalAck
            | Self::FirmwareErase => {}
            Self::Ping(inner) => enc(inner, &mut buf)?,
            Self::Success(inner) => enc(inner, &mut buf)?,
            Self::Failure(inner) => enc(inner, &mut buf)?,
            Self::Features(inner) => enc(inner, &mut buf)?,
            Self::ChangePin(inner) => enc(inner, &mut buf)?,
            Self::ApplySettings(inner) => enc(inner, &mut buf)?,
            Self::GetEntropy(inner) => enc(inner, &mut buf)?,
            Self::Entropy(inner) => enc(inner, &mut buf)?,
            Self::ButtonRequest(inner) => enc(inner, &mut buf)?,
            Self::PinMatrixRequest(inner) => enc(inner, &mut buf)?,
            Self::PinMatrixAck(inner) => enc(inner, &mut buf)?,
            Self::PassphraseAck(inner) => enc(inner, &mut buf)?,
            Self::GetPublicKey(inner) => enc(inner, &mut buf)?,
            Self::PublicKey(inner) => enc(inner, &mut buf)?,
            Self::GetAddress(inner) => enc(inner, &mut buf)?,
            Self::Address(inner) => enc(inner, &mut buf)?,
            Self::SignMessage(inner) => enc(inner, &mut buf)?,
            Self::VerifyMessage(inner) => enc(inner, &mut buf)?,
            Self::MessageSignature(inner) => enc(inner, &mut buf)?,
            Self::EncryptMessage(inner) => enc(inner, &mut buf)?,
            Self::EncryptedMessage(inner) => enc(inner, &mut buf)?,
            Self::DecryptMessage(inner) => enc(inner, &mut buf)?,
            Self::DecryptedMessage(inner) => enc(inner, &mut buf)?,
            Self::CipherKeyValue(inner) => enc(inner, &mut buf)?,
            Self::CipheredKeyValue(inner) => enc(inner, &mut buf)?,
            Self::LoadDevice(inner) => enc(inner, &mut buf)?,
            Self::ResetDevice(inner) => enc(inner, &mut buf)?,
            Self::EntropyAck(inner) => enc(inner, &mut buf)?,
            Self::RecoveryDevice(inner) => enc(inner, &mut buf)?,
            Self::WordAck(inner) => enc(inner, &mut buf)?,
            Self::CharacterRequest(inner) => enc(inner, &mut buf)?,
            Self::CharacterAck(inner) => enc(inner, &mut buf)?,
            Self::SignTx(inner) => enc(inner, &mut buf)?,
            Self::TxRequest(inner) => enc(inner, &mut buf)?,
            Self::TxAck(inner) => enc(inner, &mut buf)?,
            Self::EstimateTxSize(inner) => enc(inner, &mut buf)?,
            Self::TxSize(inner) => enc(inner, &mut buf)?,
            Self::EthereumGetAddress(inner) => enc(inner, &mut buf)?,
            Self::EthereumAddress(inner) => enc(inner, &mut buf)?,
            Self::EthereumSignTx(inner) => enc(inner, &mut buf)?,
            Self::EthereumTxRequest(inner) => enc(inner, &mut buf)?,
            Self::EthereumTxAck(inner) => enc(inner, &mut buf)?,
            Self::EthereumSignMessage(inner) => enc(inner, &mut buf)?,
            Self::EthereumVerifyMessage(inner) => enc(inner, &mut buf)?,
            Self::EthereumMessageSignature(inner) => enc(inner, &mut buf)?,
            Self::CosmosSignTx(inner) => enc(inner, &mut buf)?,
            Self::CosmosTxRequest(inner) => enc(inner, &mut buf)?,
            Self::CosmosTxAck(inner) => enc(inner, &mut buf)?,
            Self::CosmosSignedTx(inner) => enc(inner, &mut buf)?,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkDecision(inner) => enc(inner, &mut buf)?,
            #[cfg(feature = "debug-link")]
            Self::DebugLinkGetState | Self::DebugLinkStop | Self::DebugLinkFillConfig => {}
            #[cfg(feature = "debug-link")]
            Self::DebugLinkState(inner) => enc(inner, &mut buf)?,
        }
        Ok(buf)
    }

    /// Decode a payload for a known type code.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownType` for the raw `FirmwareUpload` code,
    ///   whose payload never decodes, and for debug-link codes when the
    ///   feature is compiled out.
    /// - `ProtocolError::Decode` when the bytes do not match the schema.
    pub fn decode(message_type: MessageType, bytes: &[u8]) -> Result<Self> {
        let message = match message_type {
            MessageType::Initialize => Self::Initialize,
            MessageType::Ping => Self::Ping(dec(message_type, bytes)?),
            MessageType::Success => Self::Success(dec(message_type, bytes)?),
            MessageType::Failure => Self::Failure(dec(message_type, bytes)?),
            MessageType::Features => Self::Features(dec(message_type, bytes)?),
            MessageType::ChangePin => Self::ChangePin(dec(message_type, bytes)?),
            MessageType::WipeDevice => Self::WipeDevice,
            MessageType::ApplySettings => Self::ApplySettings(dec(message_type, bytes)?),
            MessageType::ClearSession => Self::ClearSession,
            MessageType::Cancel => Self::Cancel,
            MessageType::GetEntropy => Self::GetEntropy(dec(message_type, bytes)?),
            MessageType::Entropy => Self::Entropy(dec(message_type, bytes)?),
            MessageType::ButtonRequest => Self::ButtonRequest(dec(message_type, bytes)?),
            MessageType::ButtonAck => Self::ButtonAck,
            MessageType::PinMatrixRequest => Self::PinMatrixRequest(dec(message_type, bytes)?),
            MessageType::PinMatrixAck => Self::PinMatrixAck(dec(message_type, bytes)?),
            MessageType::PassphraseRequest => Self::PassphraseRequest,
            MessageType::PassphraseAck => Self::PassphraseAck(dec(message_type, bytes)?),
            MessageType::GetPublicKey => Self::GetPublicKey(dec(message_type, bytes)?),
            MessageType::PublicKey => Self::PublicKey(dec(message_type, bytes)?),
            MessageType::GetAddress => Self::GetAddress(dec(message_type, bytes)?),
            MessageType::Address => Self::Address(dec(message_type, bytes)?),
            MessageType::SignMessage => Self::SignMessage(dec(message_type, bytes)?),
            MessageType::VerifyMessage => Self::VerifyMessage(dec(message_type, bytes)?),
            MessageType::MessageSignature => Self::MessageSignature(dec(message_type, bytes)?),
            MessageType::EncryptMessage => Self::EncryptMessage(dec(message_type, bytes)?),
            MessageType::EncryptedMessage => Self::EncryptedMessage(dec(message_type, bytes)?),
            MessageType::DecryptMessage => Self::DecryptMessage(dec(message_type, bytes)?),
            MessageType::DecryptedMessage => Self::DecryptedMessage(dec(message_type, bytes)?),
            MessageType::CipherKeyValue => Self::CipherKeyValue(dec(message_type, bytes)?),
            MessageType::CipheredKeyValue => Self::CipheredKeyValue(dec(message_type, bytes)?),
            MessageType::LoadDevice => Self::LoadDevice(dec(message_type, bytes)?),
            MessageType::ResetDevice => Self::ResetDevice(dec(message_type, bytes)?),
            MessageType::EntropyRequest => Self::EntropyRequest,
            MessageType::EntropyAck => Self::EntropyAck(dec(message_type, bytes)?),
            MessageType::RecoveryDevice => Self::RecoveryDevice(dec(message_type, bytes)?),
            MessageType::WordRequest => Self::WordRequest,
            MessageType::WordAck => Self::WordAck(dec(message_type, bytes)?),
            MessageType::CharacterRequest => Self::CharacterRequest(dec(message_type, bytes)?),
            MessageType::CharacterAck => Self::CharacterAck(dec(message_type, bytes)?),
            MessageType::CharacterDeleteAck => Self::CharacterDeleteAck,
            MessageType::CharacterFinalAck => Self::CharacterFinalAck,
            MessageType::SignTx => Self::SignTx(dec(message_type, bytes)?),
            MessageType::TxRequest => Self::TxRequest(dec(message_type, bytes)?),
            MessageType::TxAck => Self::TxAck(dec(message_type, bytes)?),
            MessageType::EstimateTxSize => Self::EstimateTxSize(dec(message_type, bytes)?),
            MessageType::TxSize => Self::TxSize(dec(message_type, bytes)?),
            MessageType::FirmwareErase => Self::FirmwareErase,
            MessageType::FirmwareUpload => {
                return Err(ProtocolError::UnknownType(message_type.to_u16()))
            }
            MessageType::EthereumGetAddress => {
                Self::EthereumGetAddress(dec(message_type, bytes)?)
            }
            MessageType::EthereumAddress => Self::EthereumAddress(dec(message_type, bytes)?),
            MessageType::EthereumSignTx => Self::EthereumSignTx(dec(message_type, bytes)?),
            MessageType::EthereumTxRequest => Self::EthereumTxRequest(dec(message_type, bytes)?),
            MessageType::EthereumTxAck => Self::EthereumTxAck(dec(message_type, bytes)?),
            MessageType::EthereumSignMessage => {
                Self::EthereumSignMessage(dec(message_type, bytes)?)
            }
            MessageType::EthereumVerifyMessage => {
                Self::EthereumVerifyMessage(dec(message_type, bytes)?)
            }
            MessageType::EthereumMessageSignature => {
                Self::EthereumMessageSignature(dec(message_type, bytes)?)
            }
            MessageType::CosmosSignTx => Self::CosmosSignTx(dec(message_type, bytes)?),
            MessageType::CosmosTxRequest => Self::CosmosTxRequest(dec(message_type, bytes)?),
            MessageType::CosmosTxAck => Self::CosmosTxAck(dec(message_type, bytes)?),
            MessageType::CosmosSignedTx => Self::CosmosSignedTx(dec(message_type, bytes)?),
            #[cfg(feature = "debug-link")]
            MessageType::DebugLinkDecision => Self::DebugLinkDecision(dec(message_type, bytes)?),
            #[cfg(feature = "debug-link")]
            MessageType::DebugLinkGetState => Self::DebugLinkGetState,
            #[cfg(feature = "debug-link")]
            MessageType::DebugLinkState => Self::DebugLinkState(dec(message_type, bytes)?),
            #[cfg(feature = "debug-link")]
            MessageType::DebugLinkStop => Self::DebugLinkStop,
            #[cfg(feature = "debug-link")]
            MessageType::DebugLinkFillConfig => Self::DebugLinkFillConfig,
            #[cfg(not(feature = "debug-link"))]
            MessageType::DebugLinkDecision
            | MessageType::DebugLinkGetState
            | MessageType::DebugLinkState
            | MessageType::DebugLinkStop
            | MessageType::DebugLinkFillConfig => {
                return Err(ProtocolError::UnknownType(message_type.to_u16()))
            }
        };
        Ok(message)
    }

    /// Encode and split into wire packets.
    pub fn to_packets(&self) -> Result<Vec<crate::frame::Packet>> {
        let payload = self.encode()?;
        crate::Framer::segment(self.message_type().to_u16(), &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureCode;

    fn round_trip(message: Message) {
        let bytes = message.encode().unwrap();
        let decoded = Message::decode(message.message_type(), &bytes).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn unit_messages_encode_to_nothing() {
        assert!(Message::Initialize.encode().unwrap().is_empty());
        assert!(Message::Cancel.encode().unwrap().is_empty());
        round_trip(Message::Initialize);
        round_trip(Message::ButtonAck);
    }

    #[test]
    fn failure_round_trip() {
        round_trip(Message::Failure(device::Failure {
            code: Some(FailureCode::ActionCancelled),
            message: Some("Wipe cancelled".into()),
        }));
    }

    #[test]
    fn features_round_trip() {
        round_trip(Message::Features(Box::new(device::Features {
            vendor: Some("keepkey.com".into()),
            initialized: Some(false),
            coins: vec![device::CoinInfo {
                coin_name: "Bitcoin".into(),
                coin_shortcut: "BTC".into(),
                address_type: 0,
                address_type_p2sh: 5,
                maxfee_kb: 1_000_000,
                segwit: true,
                bech32_hrp: Some("bc".into()),
            }],
            ..Default::default()
        })));
    }

    #[test]
    fn tx_ack_round_trip() {
        round_trip(Message::TxAck(tx::TxAck {
            tx: Some(tx::TransactionType {
                inputs: vec![tx::TxInput {
                    address_n: vec![0x8000_002C, 0x8000_0000, 0x8000_0000, 0, 0],
                    prev_hash: vec![0xAB; 32],
                    prev_index: 1,
                    amount: 50_000,
                    sequence: None,
                    script_type: Some(keys::InputScriptType::SpendAddress),
                    multisig: None,
                }],
                outputs: vec![],
            }),
        }));
    }

    #[test]
    fn firmware_upload_never_decodes() {
        assert!(Message::decode(MessageType::FirmwareUpload, &[]).is_err());
    }

    #[test]
    fn load_device_round_trip() {
        round_trip(Message::LoadDevice(provision::LoadDevice {
            mnemonic: Some("all all all all all all all all all all all all".into()),
            passphrase_protection: Some(false),
            ..Default::default()
        }));
    }

    #[test]
    fn ethereum_sign_tx_round_trip() {
        round_trip(Message::EthereumSignTx(Box::new(ethereum::EthereumSignTx {
            address_n: vec![0x8000_002C, 0x8000_003C, 0x8000_0000, 0, 0],
            nonce: vec![0x01],
            gas_price: vec![0x04, 0xA8, 0x17, 0xC8, 0x00],
            gas_limit: vec![0x52, 0x08],
            to: Some(vec![0x11; 20]),
            value: vec![0x0D, 0xE0, 0xB6, 0xB3, 0xA7, 0x64, 0x00, 0x00],
            chain_id: Some(1),
            ..Default::default()
        })));
    }
}
