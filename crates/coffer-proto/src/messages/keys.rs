//! Key derivation, address and message-cryptography payloads.

use serde::{Deserialize, Serialize};

/// Serialized BIP-32 node, optionally carrying the private key.
///
/// Devices never emit the private key; it is accepted inbound only for
/// `LoadDevice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdNodeType {
    /// Derivation depth from the master node.
    pub depth: u32,
    /// Parent key fingerprint.
    pub fingerprint: u32,
    /// Child index this node was derived with.
    pub child_num: u32,
    /// 32-byte chain code.
    #[serde(with = "serde_bytes")]
    pub chain_code: Vec<u8>,
    /// 32-byte private key, host-to-device only.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub private_key: Option<Vec<u8>>,
    /// 33-byte compressed public key.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub public_key: Option<Vec<u8>>,
}

/// How an input (or change output) will be spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum InputScriptType {
    SpendAddress,
    SpendMultisig,
    SpendP2ShWitness,
    SpendWitness,
}

/// Multisig redeem script description: threshold-of-N compressed pubkeys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigRedeemScriptType {
    /// Compressed 33-byte public keys, in script order.
    pub pubkeys: Vec<serde_bytes::ByteBuf>,
    /// Required signature count.
    pub m: u32,
}

/// Request an extended public key for a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPublicKey {
    /// BIP-32 path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
}

/// Extended public key reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// The derived node, public parts only.
    pub node: HdNodeType,
    /// Base58Check xpub serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpub: Option<String>,
}

/// Request a coin address for a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAddress {
    /// BIP-32 path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Coin name, defaults to Bitcoin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
    /// Show the address on the device and require confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_display: Option<bool>,
    /// Present for multisig P2SH addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multisig: Option<MultisigRedeemScriptType>,
    /// Script type controlling the address encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_type: Option<InputScriptType>,
}

/// Address reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Encoded address string.
    pub address: String,
}

/// Sign a text message with a coin key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessage {
    /// BIP-32 path of the signing key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Message bytes.
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
    /// Coin name, defaults to Bitcoin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
}

/// Verify a signed text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyMessage {
    /// Claimed signer address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// 65-byte compact recoverable signature.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
    /// Message bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
    /// Coin name, defaults to Bitcoin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
}

/// Message signature reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    /// Signer address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// 65-byte compact recoverable signature.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signature: Option<Vec<u8>>,
}

/// Encrypt a message to a public key, optionally signing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptMessage {
    /// Recipient's 33-byte compressed public key.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub pubkey: Option<Vec<u8>>,
    /// Plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
    /// Mark the plaintext display-only for the recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_only: Option<bool>,
    /// Signing path; empty means anonymous encryption.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Coin for the signer address encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_name: Option<String>,
}

/// Encrypted message reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Ephemeral public key.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
    /// Ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
    /// Authentication tag.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub hmac: Option<Vec<u8>>,
}

/// Decrypt a message addressed to one of our keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptMessage {
    /// Path of the decryption key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Ephemeral public key from the sender.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
    /// Ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
    /// Authentication tag.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub hmac: Option<Vec<u8>>,
}

/// Decrypted message reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    /// Plaintext, absent when the sender marked it display-only.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub message: Option<Vec<u8>>,
    /// Sender address when the message was signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Symmetrically encrypt or decrypt a value under a derived key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherKeyValue {
    /// Path of the keying node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_n: Vec<u32>,
    /// Key-derivation label, shown to the user when confirmation is asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Value to cipher; length must be a multiple of 16.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub value: Option<Vec<u8>>,
    /// True to encrypt, false to decrypt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<bool>,
    /// Require confirmation when encrypting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_on_encrypt: Option<bool>,
    /// Require confirmation when decrypting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask_on_decrypt: Option<bool>,
}

/// Ciphered value reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipheredKeyValue {
    /// The ciphered (or deciphered) value.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub value: Option<Vec<u8>>,
}
