//! Cosmos signing payloads.
//!
//! Cosmos signs a canonical JSON document, so the payloads carry decimal
//! amounts and bech32 addresses as strings.

use serde::{Deserialize, Serialize};

/// Start signing a Cosmos transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosSignTx {
    /// BIP-32 path of the signing key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// On-chain account number.
    pub account_number: u64,
    /// Chain identifier, e.g. `"cosmoshub-4"`.
    pub chain_id: String,
    /// Fee in micro-units.
    pub fee_amount: u64,
    /// Gas limit.
    pub gas: u64,
    /// Transaction memo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Account sequence.
    pub sequence: u64,
    /// Number of messages the host will provide.
    pub msg_count: u32,
}

/// Device asks for the next message of the transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosTxRequest {}

/// A single bank send message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosMsgSend {
    /// Sender bech32 address.
    pub from_address: String,
    /// Recipient bech32 address.
    pub to_address: String,
    /// Amount in micro-units.
    pub amount: u64,
    /// Denomination, defaults to `"uatom"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denom: Option<String>,
}

/// Host supplies the requested message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosTxAck {
    /// The send message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send: Option<CosmosMsgSend>,
}

/// Finished signature reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosSignedTx {
    /// Compact 64-byte signature.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Compressed public key of the signer.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub public_key: Vec<u8>,
}
