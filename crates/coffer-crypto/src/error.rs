//! Error type for wallet cryptography.

use thiserror::Error;

/// Errors from key derivation, signing and cipher operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A child-key derivation step produced an invalid scalar.
    ///
    /// Astronomically unlikely for honest indices; surfaced rather than
    /// retried so the caller can fail the whole operation.
    #[error("key derivation failed at index {index:#010x}")]
    DerivationFailed {
        /// Child index of the failing step.
        index: u32,
    },

    /// Byte string was not a valid secp256k1 private key.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Byte string was not a valid SEC-1 public key.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes were malformed or did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Mnemonic failed the wordlist or checksum test.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Ciphertext length or padding was wrong.
    #[error("cipher input invalid: {0}")]
    CipherInput(&'static str),

    /// Authentication tag mismatch on decryption.
    #[error("message authentication failed")]
    MacMismatch,

    /// Address string did not parse for the expected encoding.
    #[error("invalid address")]
    InvalidAddress,
}
