//! Interactive transaction-signing payloads.
//!
//! Transactions never fit in device RAM, so signing is a request/ack
//! conversation: the device asks for one input or output at a time with
//! `TxRequest` and the host answers with a `TxAck` carrying exactly that
//! item. Signatures come back piggybacked on later requests.

use serde::{Deserialize, Serialize};

use super::keys::{InputScriptType, MultisigRedeemScriptType};

/// Start signing a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTx {
    /// Number of outputs the host will provide.
    pub outputs_count: u32,
    /// Number of inputs the host will provide.
    pub inputs_count: u32,
    /// Coin name, defaults to Bitcoin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
    /// Transaction version, defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Lock time, defaults to 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_time: Option<u32>,
}

/// What the device wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RequestType {
    TxInput,
    TxOutput,
    TxFinished,
}

/// Index qualifier for a `TxRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequestDetails {
    /// Input or output index being requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_index: Option<u32>,
}

/// Signature material delivered alongside a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequestSerialized {
    /// Which input the signature belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_index: Option<u32>,
    /// DER-encoded ECDSA signature.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
    /// Compressed public key for that input.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub pubkey: Option<Vec<u8>>,
}

/// Device-to-host step of the signing conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    /// What to send next; `TxFinished` ends the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestType>,
    /// Which item is wanted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TxRequestDetails>,
    /// Completed signature material, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialized: Option<TxRequestSerialized>,
}

/// One transaction input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// BIP-32 path of the key that owns this input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Hash of the previous transaction (display order).
    #[serde(with = "serde_bytes")]
    pub prev_hash: Vec<u8>,
    /// Output index in the previous transaction.
    pub prev_index: u32,
    /// Value of the spent output in base units. Required; it feeds both
    /// the fee check and the segwit sighash.
    pub amount: u64,
    /// Sequence number, defaults to `0xFFFF_FFFF`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
    /// How this input will be spent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_type: Option<InputScriptType>,
    /// Redeem script description for multisig inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multisig: Option<MultisigRedeemScriptType>,
}

/// Output script kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum OutputScriptType {
    PayToAddress,
    PayToWitness,
    PayToP2ShWitness,
    PayToOpReturn,
}

/// Semantic type of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum OutputAddressType {
    Spend,
    Transfer,
    Exchange,
}

/// One transaction output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Destination address; absent for change outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// BIP-32 path for change outputs derivable on this device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Value in base units.
    pub amount: u64,
    /// Script kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_type: Option<OutputScriptType>,
    /// Spend, transfer-to-self or exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_type: Option<OutputAddressType>,
    /// Data payload for `PayToOpReturn` outputs.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub op_return_data: Option<Vec<u8>>,
    /// Signed exchange contract for `Exchange` outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_type: Option<ExchangeType>,
}

/// Container for the single input or output an ack carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionType {
    /// At most one input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TxInput>,
    /// At most one output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TxOutput>,
}

/// Host-to-device step of the signing conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAck {
    /// The requested item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TransactionType>,
}

/// Address with its coin, as quoted by the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAddress {
    /// Short coin name, e.g. `"BTC"`.
    pub coin_type: String,
    /// Encoded address.
    pub address: String,
}

/// Quote issued by the exchange counterparty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    /// Where the funds being exchanged must be deposited.
    pub deposit_address: ExchangeAddress,
    /// Deposit amount in base units of the deposit coin.
    pub deposit_amount: u64,
    /// Where the exchanged funds will be delivered.
    pub withdrawal_address: ExchangeAddress,
    /// Quoted withdrawal amount in base units of the withdrawal coin.
    pub withdrawal_amount: u64,
    /// Fallback address when the exchange fails.
    pub return_address: ExchangeAddress,
    /// Quoted rate, scaled by 10^8.
    pub quoted_rate: u64,
    /// Quote expiration, milliseconds since the epoch.
    pub expiration: u64,
}

/// Exchange quote plus the counterparty signature over its encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedExchangeResponse {
    /// The quote.
    pub response: ExchangeResponse,
    /// Counterparty ECDSA signature over the encoded quote.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Exchange contract attached to a transaction output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeType {
    /// The signed quote.
    pub signed_exchange_response: SignedExchangeResponse,
    /// Coin the withdrawal lands in.
    pub withdrawal_coin_name: String,
    /// Path proving the withdrawal address belongs to this device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub withdrawal_address_n: Vec<u32>,
    /// Path proving the return address belongs to this device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_address_n: Vec<u32>,
}

/// Ask for a size estimate without signing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateTxSize {
    /// Number of outputs.
    pub outputs_count: u32,
    /// Number of inputs.
    pub inputs_count: u32,
    /// Coin name, defaults to Bitcoin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
}

/// Size estimate reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSize {
    /// Estimated size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_size: Option<u32>,
}
