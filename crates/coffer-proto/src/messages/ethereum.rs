//! Ethereum signing payloads.
//!
//! Integers (nonce, gas, value) travel as minimal big-endian byte strings,
//! matching their RLP form on the wire.

use serde::{Deserialize, Serialize};

use super::tx::{ExchangeType, OutputAddressType};

/// Request an Ethereum address for a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumGetAddress {
    /// BIP-32 path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Show the address on the device and require confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_display: Option<bool>,
}

/// Ethereum address reply (raw 20 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumAddress {
    /// 20-byte address.
    #[serde(with = "serde_bytes")]
    pub address: Vec<u8>,
}

/// Start signing an Ethereum transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumSignTx {
    /// BIP-32 path of the signing key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Account nonce, minimal big-endian.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub nonce: Vec<u8>,
    /// Gas price in wei, minimal big-endian.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub gas_price: Vec<u8>,
    /// Gas limit, minimal big-endian.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub gas_limit: Vec<u8>,
    /// Destination, 20 bytes; absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub to: Option<Vec<u8>>,
    /// Value in wei, minimal big-endian.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub value: Vec<u8>,
    /// First chunk of the data field.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data_initial_chunk: Option<Vec<u8>>,
    /// Total data length; chunks beyond the first stream via `EthereumTxAck`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_length: Option<u32>,
    /// EIP-155 chain id; absent or 0 means pre-EIP-155 signing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u32>,
    /// Spend, transfer-to-self or exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_type: Option<OutputAddressType>,
    /// Exchange contract for `Exchange` transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<ExchangeType>,
    /// Destination path for transfer-to-self transactions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_address_n: Vec<u32>,
}

/// Device-to-host step: more data wanted, or the finished signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumTxRequest {
    /// Bytes of data still wanted; 0 or absent when signing is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_length: Option<u32>,
    /// Recovery value with EIP-155 offset applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_v: Option<u32>,
    /// Signature r, 32 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature_r: Option<Vec<u8>>,
    /// Signature s, 32 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature_s: Option<Vec<u8>>,
}

/// Next chunk of the data field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumTxAck {
    /// Data bytes, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub data_chunk: Vec<u8>,
}

/// Sign a personal message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumSignMessage {
    /// BIP-32 path of the signing key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Message bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub message: Vec<u8>,
}

/// Verify a personal-message signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumVerifyMessage {
    /// Claimed signer address, 20 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub address: Option<Vec<u8>>,
    /// 65-byte recoverable signature.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
    /// Message bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
}

/// Personal-message signature reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumMessageSignature {
    /// Signer address, 20 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub address: Option<Vec<u8>>,
    /// 65-byte recoverable signature.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
}
