//! Signed-message formats.
//!
//! Bitcoin-style messages commit to a varint-prefixed magic plus the
//! message, double-SHA-256 hashed, and carry a 65-byte compact signature
//! whose header byte encodes the recovery id. Ethereum personal messages
//! use the `"\x19Ethereum Signed Message:\n"` prefix with Keccak-256.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::{address, ecdsa, CryptoError, Result};

const BITCOIN_MAGIC: &[u8] = b"Bitcoin Signed Message:\n";
const ETHEREUM_MAGIC: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Header base for compressed-key signatures in the 65-byte format.
const COMPRESSED_HEADER: u8 = 31;

fn push_varint(out: &mut impl sha2::digest::Update, value: u64) {
    if value < 0xFD {
        out.update(&[value as u8]);
    } else if value <= 0xFFFF {
        out.update(&[0xFD]);
        out.update(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.update(&[0xFE]);
        out.update(&(value as u32).to_le_bytes());
    } else {
        out.update(&[0xFF]);
        out.update(&value.to_le_bytes());
    }
}

/// Digest a Bitcoin-style signed message.
#[must_use]
pub fn bitcoin_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    push_varint(&mut hasher, BITCOIN_MAGIC.len() as u64);
    Digest::update(&mut hasher, BITCOIN_MAGIC);
    push_varint(&mut hasher, message.len() as u64);
    Digest::update(&mut hasher, message);
    let first: [u8; 32] = hasher.finalize().into();
    Sha256::digest(first).into()
}

/// Sign a Bitcoin-style message, returning the 65-byte compact form.
pub fn bitcoin_sign(private_key: &[u8; 32], message: &[u8]) -> Result<[u8; 65]> {
    let digest = bitcoin_message_digest(message);
    let (signature, recovery) = ecdsa::sign_recoverable(private_key, &digest)?;
    let mut out = [0u8; 65];
    out[0] = COMPRESSED_HEADER + recovery;
    out[1..].copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verify a 65-byte Bitcoin message signature against an address.
pub fn bitcoin_verify(
    address_version: u8,
    address: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    if signature.len() != 65 {
        return Err(CryptoError::InvalidSignature);
    }
    let header = signature[0];
    if !(27..=34).contains(&header) {
        return Err(CryptoError::InvalidSignature);
    }
    let recovery = (header - 27) & 0x03;

    let digest = bitcoin_message_digest(message);
    let mut compact = [0u8; 64];
    compact.copy_from_slice(&signature[1..]);
    let public_key = ecdsa::recover_compressed(&digest, &compact, recovery)?;

    let (version, hash) = address::decode_base58(address)?;
    if version != address_version || hash != address::hash160(&public_key) {
        return Err(CryptoError::InvalidSignature);
    }
    Ok(())
}

/// Digest an Ethereum personal message.
#[must_use]
pub fn ethereum_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    Digest::update(&mut hasher, ETHEREUM_MAGIC);
    Digest::update(&mut hasher, message.len().to_string().as_bytes());
    Digest::update(&mut hasher, message);
    hasher.finalize().into()
}

/// Sign an Ethereum personal message, returning `r || s || v`.
pub fn ethereum_sign(private_key: &[u8; 32], message: &[u8]) -> Result<[u8; 65]> {
    let digest = ethereum_message_digest(message);
    let (signature, recovery) = ecdsa::sign_recoverable(private_key, &digest)?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = 27 + recovery;
    Ok(out)
}

/// Verify an Ethereum personal-message signature against a raw address.
pub fn ethereum_verify(address: &[u8; 20], message: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != 65 {
        return Err(CryptoError::InvalidSignature);
    }
    let v = signature[64];
    let recovery = if v >= 27 { v - 27 } else { v };

    let digest = ethereum_message_digest(message);
    let mut compact = [0u8; 64];
    compact.copy_from_slice(&signature[..64]);
    let public_key = ecdsa::recover_compressed(&digest, &compact, recovery)?;
    if address::ethereum_pubkeyhash(&public_key)? != *address {
        return Err(CryptoError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdnode::HdNode;

    #[test]
    fn bitcoin_sign_verify_round_trip() {
        let node = HdNode::from_seed(&[1u8; 32]).unwrap();
        let address = address::p2pkh(&node.public_key, 0);
        let signature = bitcoin_sign(node.private_key(), b"hello coffer").unwrap();
        bitcoin_verify(0, &address, b"hello coffer", &signature).unwrap();
    }

    #[test]
    fn bitcoin_verify_rejects_wrong_message() {
        let node = HdNode::from_seed(&[1u8; 32]).unwrap();
        let address = address::p2pkh(&node.public_key, 0);
        let signature = bitcoin_sign(node.private_key(), b"hello").unwrap();
        assert!(bitcoin_verify(0, &address, b"tampered", &signature).is_err());
    }

    #[test]
    fn bitcoin_verify_rejects_wrong_address() {
        let signer = HdNode::from_seed(&[1u8; 32]).unwrap();
        let other = HdNode::from_seed(&[2u8; 32]).unwrap();
        let address = address::p2pkh(&other.public_key, 0);
        let signature = bitcoin_sign(signer.private_key(), b"hello").unwrap();
        assert!(bitcoin_verify(0, &address, b"hello", &signature).is_err());
    }

    #[test]
    fn ethereum_sign_verify_round_trip() {
        let node = HdNode::from_seed(&[4u8; 32]).unwrap();
        let address = address::ethereum_pubkeyhash(&node.public_key).unwrap();
        let signature = ethereum_sign(node.private_key(), b"gm").unwrap();
        ethereum_verify(&address, b"gm", &signature).unwrap();
        assert!(ethereum_verify(&address, b"gn", &signature).is_err());
    }
}
