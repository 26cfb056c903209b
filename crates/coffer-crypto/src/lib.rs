//! Wallet cryptography for the Coffer device core.
//!
//! Thin, well-typed wrappers over the RustCrypto stack: BIP-32 hierarchical
//! derivation ([`hdnode`]), BIP-39 seed handling ([`mnemonic`]),
//! deterministic low-S ECDSA over secp256k1 ([`ecdsa`]), coin address
//! encodings ([`address`]), the signed-message formats ([`message_sign`]),
//! the symmetric value cipher and ECIES message encryption ([`cipher`]),
//! the legacy encrypted-node format ([`legacy`]) and streaming RLP
//! ([`rlp`]).
//!
//! Everything here is pure computation. Key material lives in containers
//! that zero themselves on drop; nothing in this crate does I/O or holds
//! device state.

pub mod address;
pub mod cipher;
pub mod ecdsa;
pub mod hdnode;
pub mod legacy;
pub mod message_sign;
pub mod mnemonic;
pub mod rlp;

mod error;

pub use error::CryptoError;
pub use hdnode::HdNode;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CryptoError>;
