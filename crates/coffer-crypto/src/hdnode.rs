//! BIP-32 hierarchical deterministic key derivation.
//!
//! An [`HdNode`] is one node of the derivation tree: chain code, private
//! key, cached public key, plus the depth/fingerprint/child-number metadata
//! that goes into the xpub serialization. Child derivation walks the tree
//! by repeated CKD; the private key is zeroed when the node is dropped.

use hmac::{Hmac, Mac};
use k256::{
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    FieldBytes, Scalar, SecretKey,
};
use sha2::Sha512;
use zeroize::Zeroize;

use crate::{address::hash160, CryptoError, Result};

type HmacSha512 = Hmac<Sha512>;

/// Domain-separation key for master-node derivation.
const MASTER_SEED_KEY: &[u8] = b"Bitcoin seed";

/// Bit marking a hardened child index.
pub const HARDENED: u32 = 0x8000_0000;

/// Version bytes of a mainnet xpub serialization.
const XPUB_VERSION: u32 = 0x0488_B21E;

/// One node of the BIP-32 tree.
#[derive(Clone)]
pub struct HdNode {
    /// Depth below the master node.
    pub depth: u32,
    /// Fingerprint of the parent public key.
    pub fingerprint: u32,
    /// Index this node was derived with.
    pub child_num: u32,
    /// Chain code.
    pub chain_code: [u8; 32],
    private_key: [u8; 32],
    /// Compressed public key, kept in sync with the private key.
    pub public_key: [u8; 33],
}

impl Drop for HdNode {
    fn drop(&mut self) {
        self.private_key.zeroize();
        self.chain_code.zeroize();
    }
}

impl HdNode {
    /// Master node from a BIP-39 seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let Ok(mut mac) = HmacSha512::new_from_slice(MASTER_SEED_KEY) else {
            // HMAC accepts any key size.
            return Err(CryptoError::InvalidPrivateKey);
        };
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        let mut private_key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        private_key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        let public_key = compute_public_key(&private_key)?;
        Ok(Self { depth: 0, fingerprint: 0, child_num: 0, chain_code, private_key, public_key })
    }

    /// Rebuild a node from stored parts, recomputing the public key.
    pub fn from_parts(
        depth: u32,
        fingerprint: u32,
        child_num: u32,
        chain_code: [u8; 32],
        private_key: [u8; 32],
    ) -> Result<Self> {
        let public_key = compute_public_key(&private_key)?;
        Ok(Self { depth, fingerprint, child_num, chain_code, private_key, public_key })
    }

    /// Private key bytes. Handle with care; prefer passing the node itself.
    #[must_use]
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Fingerprint of this node's public key (for its children).
    #[must_use]
    pub fn own_fingerprint(&self) -> u32 {
        let h = hash160(&self.public_key);
        u32::from_be_bytes([h[0], h[1], h[2], h[3]])
    }

    /// Derive one child in place.
    ///
    /// Hardened indices (`>= 0x8000_0000`) commit to the private key;
    /// normal indices commit to the public key.
    pub fn ckd(&mut self, index: u32) -> Result<()> {
        let Ok(mut mac) = HmacSha512::new_from_slice(&self.chain_code) else {
            return Err(CryptoError::DerivationFailed { index });
        };
        if index & HARDENED != 0 {
            mac.update(&[0u8]);
            mac.update(&self.private_key);
        } else {
            mac.update(&self.public_key);
        }
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let il: Option<Scalar> =
            Scalar::from_repr(FieldBytes::clone_from_slice(&digest[..32])).into();
        let parent: Option<Scalar> =
            Scalar::from_repr(FieldBytes::from(self.private_key)).into();
        let (Some(il), Some(parent)) = (il, parent) else {
            return Err(CryptoError::DerivationFailed { index });
        };

        let child = il + parent;
        if bool::from(child.is_zero()) {
            return Err(CryptoError::DerivationFailed { index });
        }

        let parent_fingerprint = self.own_fingerprint();

        let mut child_key = [0u8; 32];
        child_key.copy_from_slice(&child.to_repr());
        let public_key = compute_public_key(&child_key)?;

        self.private_key.zeroize();
        self.private_key = child_key;
        self.chain_code.copy_from_slice(&digest[32..]);
        self.public_key = public_key;
        self.depth += 1;
        self.fingerprint = parent_fingerprint;
        self.child_num = index;
        Ok(())
    }

    /// Derive a full path in place.
    pub fn derive_path(&mut self, path: &[u32]) -> Result<()> {
        for &index in path {
            self.ckd(index)?;
        }
        Ok(())
    }

    /// Base58Check xpub serialization of the public parts.
    #[must_use]
    pub fn serialize_xpub(&self) -> String {
        let mut raw = Vec::with_capacity(78);
        raw.extend_from_slice(&XPUB_VERSION.to_be_bytes());
        raw.push(self.depth as u8);
        raw.extend_from_slice(&self.fingerprint.to_be_bytes());
        raw.extend_from_slice(&self.child_num.to_be_bytes());
        raw.extend_from_slice(&self.chain_code);
        raw.extend_from_slice(&self.public_key);
        bs58::encode(raw).with_check().into_string()
    }
}

impl std::fmt::Debug for HdNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdNode")
            .field("depth", &self.depth)
            .field("fingerprint", &format!("{:#010x}", self.fingerprint))
            .field("child_num", &self.child_num)
            .finish_non_exhaustive()
    }
}

fn compute_public_key(private_key: &[u8; 32]) -> Result<[u8; 33]> {
    let secret =
        SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let point = secret.public_key().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// BIP-32 test vector 1: seed 000102030405060708090a0b0c0d0e0f.
    #[test]
    fn vector1_master_xpub() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        assert_eq!(
            node.serialize_xpub(),
            "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8"
        );
    }

    /// BIP-32 test vector 1: m/0'.
    #[test]
    fn vector1_hardened_child() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let mut node = HdNode::from_seed(&seed).unwrap();
        node.ckd(HARDENED).unwrap();
        assert_eq!(
            node.serialize_xpub(),
            "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw"
        );
    }

    #[test]
    fn normal_and_hardened_children_differ() {
        let seed = [7u8; 32];
        let mut a = HdNode::from_seed(&seed).unwrap();
        let mut b = a.clone();
        a.ckd(1).unwrap();
        b.ckd(1 | HARDENED).unwrap();
        assert_ne!(a.public_key, b.public_key);
        assert_eq!(a.depth, 1);
        assert_eq!(b.child_num, 1 | HARDENED);
    }

    #[test]
    fn derive_path_matches_stepwise() {
        let seed = [42u8; 64];
        let mut a = HdNode::from_seed(&seed).unwrap();
        let mut b = a.clone();
        a.derive_path(&[44 | HARDENED, HARDENED, HARDENED, 0, 0]).unwrap();
        for index in [44 | HARDENED, HARDENED, HARDENED, 0, 0] {
            b.ckd(index).unwrap();
        }
        assert_eq!(a.public_key, b.public_key);
        assert_eq!(a.chain_code, b.chain_code);
    }
}
