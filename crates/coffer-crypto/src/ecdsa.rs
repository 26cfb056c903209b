//! Deterministic ECDSA over secp256k1.
//!
//! All signatures are RFC-6979 deterministic and emitted in low-S canonical
//! form. Recovery ids track any S normalization so recovered public keys
//! stay correct.

use k256::ecdsa::{
    signature::hazmat::PrehashVerifier, RecoveryId, Signature, SigningKey, VerifyingKey,
};

use crate::{CryptoError, Result};

/// Sign a 32-byte digest, returning a low-S signature and its recovery id.
pub fn sign_recoverable(private_key: &[u8; 32], digest: &[u8; 32]) -> Result<(Signature, u8)> {
    let key = SigningKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let (mut signature, mut recovery) = key
        .sign_prehash_recoverable(digest)
        .map_err(|_| CryptoError::InvalidSignature)?;

    // k256 already emits low-S; normalize defensively and keep the recovery
    // id consistent if it ever does not.
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery = RecoveryId::from_byte(recovery.to_byte() ^ 1)
            .ok_or(CryptoError::InvalidSignature)?;
    }
    Ok((signature, recovery.to_byte()))
}

/// Sign a digest, returning the 64-byte compact `r || s` form.
pub fn sign_compact(private_key: &[u8; 32], digest: &[u8; 32]) -> Result<[u8; 64]> {
    let (signature, _) = sign_recoverable(private_key, digest)?;
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Sign a digest, returning the DER encoding.
pub fn sign_der(private_key: &[u8; 32], digest: &[u8; 32]) -> Result<Vec<u8>> {
    let (signature, _) = sign_recoverable(private_key, digest)?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER-encoded signature against a SEC-1 public key.
pub fn verify_der(public_key: &[u8], digest: &[u8; 32], der: &[u8]) -> Result<()> {
    let key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_der(der).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify_prehash(digest, &signature).map_err(|_| CryptoError::InvalidSignature)
}

/// Verify a compact `r || s` signature against a SEC-1 public key.
pub fn verify_compact(public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> Result<()> {
    let key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify_prehash(digest, &signature).map_err(|_| CryptoError::InvalidSignature)
}

/// Recover the compressed public key that produced a signature.
pub fn recover_compressed(
    digest: &[u8; 32],
    signature: &[u8; 64],
    recovery: u8,
) -> Result<[u8; 33]> {
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let recovery = RecoveryId::from_byte(recovery).ok_or(CryptoError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let point = key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

/// Split a signature into `(r, s)` 32-byte halves.
#[must_use]
pub fn split_compact(signature: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..]);
    (r, s)
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::hdnode::HdNode;

    fn digest_of(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[test]
    fn sign_verify_round_trip() {
        let node = HdNode::from_seed(&[3u8; 32]).unwrap();
        let digest = digest_of(b"coffer");
        let compact = sign_compact(node.private_key(), &digest).unwrap();
        verify_compact(&node.public_key, &digest, &compact).unwrap();
    }

    #[test]
    fn signatures_are_deterministic() {
        let node = HdNode::from_seed(&[9u8; 32]).unwrap();
        let digest = digest_of(b"same input");
        let a = sign_compact(node.private_key(), &digest).unwrap();
        let b = sign_compact(node.private_key(), &digest).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn low_s_enforced() {
        // s must stay in the lower half of the group order.
        const HALF_ORDER: [u8; 32] = [
            0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46,
            0x68, 0x1B, 0x20, 0xA0,
        ];
        let node = HdNode::from_seed(&[5u8; 32]).unwrap();
        for i in 0u8..32 {
            let digest = digest_of(&[i]);
            let compact = sign_compact(node.private_key(), &digest).unwrap();
            let (_, s) = split_compact(&compact);
            assert!(s <= HALF_ORDER, "high-S signature emitted for digest {i}");
        }
    }

    #[test]
    fn recovery_finds_the_signer() {
        let node = HdNode::from_seed(&[11u8; 32]).unwrap();
        let digest = digest_of(b"recover me");
        let (signature, recovery) = sign_recoverable(node.private_key(), &digest).unwrap();
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        let recovered = recover_compressed(&digest, &compact, recovery).unwrap();
        assert_eq!(recovered, node.public_key);
    }

    #[test]
    fn tampered_signature_rejected() {
        let node = HdNode::from_seed(&[13u8; 32]).unwrap();
        let digest = digest_of(b"tamper");
        let mut compact = sign_compact(node.private_key(), &digest).unwrap();
        compact[10] ^= 0x01;
        assert!(verify_compact(&node.public_key, &digest, &compact).is_err());
    }

    proptest::proptest! {
        /// Sign-then-verify holds for arbitrary digests, in both compact
        /// and DER forms, including after recovery.
        #[test]
        fn sign_verify_round_trip_any_digest(digest in proptest::prelude::any::<[u8; 32]>()) {
            let node = HdNode::from_seed(&[17u8; 32]).unwrap();
            let compact = sign_compact(node.private_key(), &digest).unwrap();
            verify_compact(&node.public_key, &digest, &compact).unwrap();

            let der = sign_der(node.private_key(), &digest).unwrap();
            verify_der(&node.public_key, &digest, &der).unwrap();

            let (signature, recovery) = sign_recoverable(node.private_key(), &digest).unwrap();
            let mut bytes = [0u8; 64];
            bytes.copy_from_slice(&signature.to_bytes());
            let recovered = recover_compressed(&digest, &bytes, recovery).unwrap();
            proptest::prop_assert_eq!(recovered, node.public_key);
        }
    }
}
