//! Symmetric value cipher and ECIES message encryption.
//!
//! `CipherKeyValue` derives a per-label key with HMAC-SHA512 over the
//! node's private key; the confirmation flags are folded into the label so
//! a value enciphered with confirmation cannot be deciphered silently.
//!
//! Message encryption is ECIES over secp256k1: an ephemeral key performs
//! ECDH with the recipient, SHA-512 of the shared x coordinate yields the
//! AES-256-CBC key, IV and HMAC-SHA-256 key, and the ephemeral public key
//! travels as the nonce.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use k256::{ecdh::diffie_hellman, PublicKey, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Key-value cipher. `value` length must be a multiple of 16.
///
/// The derived secret is `HMAC-SHA512(private_key, key_label || E? || D?)`
/// where the two-character suffixes record whether confirmation was
/// requested for each direction.
pub fn key_value(
    private_key: &[u8; 32],
    key_label: &str,
    value: &[u8],
    encrypt: bool,
    ask_on_encrypt: bool,
    ask_on_decrypt: bool,
) -> Result<Vec<u8>> {
    if value.is_empty() || value.len() % 16 != 0 {
        return Err(CryptoError::CipherInput("value length must be a multiple of 16"));
    }

    let Ok(mut mac) = HmacSha512::new_from_slice(private_key) else {
        return Err(CryptoError::InvalidPrivateKey);
    };
    mac.update(key_label.as_bytes());
    mac.update(if ask_on_encrypt { b"E1" } else { b"E0" });
    mac.update(if ask_on_decrypt { b"D1" } else { b"D0" });
    let mut secret = Zeroizing::new([0u8; 64]);
    secret.copy_from_slice(&mac.finalize().into_bytes());

    let key = &secret[..32];
    let iv = &secret[32..48];
    let mut buf = value.to_vec();
    if encrypt {
        Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
            .encrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buf, value.len())
            .map_err(|_| CryptoError::CipherInput("block alignment"))?;
    } else {
        Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
            .decrypt_padded_mut::<aes::cipher::block_padding::NoPadding>(&mut buf)
            .map_err(|_| CryptoError::CipherInput("block alignment"))?;
    }
    Ok(buf)
}

struct EciesKeys {
    aes_key: Zeroizing<[u8; 32]>,
    iv: [u8; 16],
    mac_key: Zeroizing<[u8; 16]>,
}

fn ecies_kdf(shared_x: &[u8]) -> EciesKeys {
    let mut digest = Zeroizing::new([0u8; 64]);
    digest.copy_from_slice(&Sha512::digest(shared_x));
    let mut aes_key = Zeroizing::new([0u8; 32]);
    let mut iv = [0u8; 16];
    let mut mac_key = Zeroizing::new([0u8; 16]);
    aes_key.copy_from_slice(&digest[..32]);
    iv.copy_from_slice(&digest[32..48]);
    mac_key.copy_from_slice(&digest[48..]);
    EciesKeys { aes_key, iv, mac_key }
}

fn ecies_tag(mac_key: &[u8], ciphertext: &[u8]) -> Result<[u8; 32]> {
    let Ok(mut mac) = HmacSha256::new_from_slice(mac_key) else {
        return Err(CryptoError::CipherInput("bad mac key"));
    };
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().into())
}

/// Encrypt `plaintext` to `recipient` (33-byte SEC-1 key).
///
/// `ephemeral_key` must be 32 fresh random bytes from the device entropy
/// source; it is consumed and never reused. Returns
/// `(nonce, ciphertext, hmac)` in wire order.
pub fn ecies_encrypt(
    recipient: &[u8],
    plaintext: &[u8],
    ephemeral_key: &[u8; 32],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let recipient =
        PublicKey::from_sec1_bytes(recipient).map_err(|_| CryptoError::InvalidPublicKey)?;
    let ephemeral =
        SecretKey::from_slice(ephemeral_key).map_err(|_| CryptoError::InvalidPrivateKey)?;

    let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), recipient.as_affine());
    let keys = ecies_kdf(shared.raw_secret_bytes());

    let mut buf = vec![0u8; plaintext.len() + 16];
    let ciphertext = Aes256CbcEnc::new_from_slices(keys.aes_key.as_ref(), &keys.iv)
        .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
        .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut buf)
        .map_err(|_| CryptoError::CipherInput("encrypt buffer"))?
        .to_vec();

    let tag = ecies_tag(keys.mac_key.as_ref(), &ciphertext)?;

    use k256::elliptic_curve::sec1::ToEncodedPoint;
    let nonce = ephemeral.public_key().to_encoded_point(true).as_bytes().to_vec();
    Ok((nonce, ciphertext, tag.to_vec()))
}

/// Decrypt an ECIES message with our private key.
pub fn ecies_decrypt(
    private_key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    let sender = PublicKey::from_sec1_bytes(nonce).map_err(|_| CryptoError::InvalidPublicKey)?;
    let secret =
        SecretKey::from_slice(private_key).map_err(|_| CryptoError::InvalidPrivateKey)?;

    let shared = diffie_hellman(secret.to_nonzero_scalar(), sender.as_affine());
    let keys = ecies_kdf(shared.raw_secret_bytes());

    let expected = ecies_tag(keys.mac_key.as_ref(), ciphertext)?;
    if tag != expected {
        return Err(CryptoError::MacMismatch);
    }

    let mut buf = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new_from_slices(keys.aes_key.as_ref(), &keys.iv)
        .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::CipherInput("padding"))?
        .to_vec();
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdnode::HdNode;

    #[test]
    fn key_value_round_trip() {
        let node = HdNode::from_seed(&[8u8; 32]).unwrap();
        let value = [0x5Au8; 32];
        let enciphered =
            key_value(node.private_key(), "note", &value, true, false, false).unwrap();
        assert_ne!(&enciphered[..], &value[..]);
        let deciphered =
            key_value(node.private_key(), "note", &enciphered, false, false, false).unwrap();
        assert_eq!(&deciphered[..], &value[..]);
    }

    #[test]
    fn confirmation_flags_change_the_key() {
        let node = HdNode::from_seed(&[8u8; 32]).unwrap();
        let value = [0x5Au8; 16];
        let a = key_value(node.private_key(), "note", &value, true, false, false).unwrap();
        let b = key_value(node.private_key(), "note", &value, true, true, false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unaligned_value_rejected() {
        let node = HdNode::from_seed(&[8u8; 32]).unwrap();
        assert!(key_value(node.private_key(), "note", &[0u8; 15], true, false, false).is_err());
    }

    #[test]
    fn ecies_round_trip() {
        let recipient = HdNode::from_seed(&[21u8; 32]).unwrap();
        let ephemeral = [0x33u8; 32];
        let (nonce, ciphertext, tag) =
            ecies_encrypt(&recipient.public_key, b"secret note", &ephemeral).unwrap();
        let plaintext =
            ecies_decrypt(recipient.private_key(), &nonce, &ciphertext, &tag).unwrap();
        assert_eq!(plaintext, b"secret note");
    }

    #[test]
    fn ecies_tag_tamper_detected() {
        let recipient = HdNode::from_seed(&[21u8; 32]).unwrap();
        let (nonce, ciphertext, mut tag) =
            ecies_encrypt(&recipient.public_key, b"secret note", &[0x33u8; 32]).unwrap();
        tag[0] ^= 1;
        assert_eq!(
            ecies_decrypt(recipient.private_key(), &nonce, &ciphertext, &tag),
            Err(CryptoError::MacMismatch)
        );
    }

    #[test]
    fn ecies_wrong_key_fails() {
        let recipient = HdNode::from_seed(&[21u8; 32]).unwrap();
        let eavesdropper = HdNode::from_seed(&[22u8; 32]).unwrap();
        let (nonce, ciphertext, tag) =
            ecies_encrypt(&recipient.public_key, b"secret note", &[0x33u8; 32]).unwrap();
        assert!(ecies_decrypt(eavesdropper.private_key(), &nonce, &ciphertext, &tag).is_err());
    }
}
