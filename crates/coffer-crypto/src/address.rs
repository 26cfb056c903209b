//! Coin address encodings.
//!
//! Base58Check for legacy Bitcoin-family addresses, bech32 for native
//! segwit and Cosmos accounts, EIP-55 checksummed hex for Ethereum.

use bech32::{FromBase32, ToBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::{CryptoError, Result};

/// RIPEMD-160 of SHA-256, the standard Bitcoin key/script hash.
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Double SHA-256.
#[must_use]
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// Base58Check P2PKH address from a compressed public key.
#[must_use]
pub fn p2pkh(public_key: &[u8; 33], version: u8) -> String {
    let mut raw = [0u8; 21];
    raw[0] = version;
    raw[1..].copy_from_slice(&hash160(public_key));
    bs58::encode(raw).with_check().into_string()
}

/// Base58Check P2SH address from a script hash.
#[must_use]
pub fn p2sh(script_hash: &[u8; 20], version: u8) -> String {
    let mut raw = [0u8; 21];
    raw[0] = version;
    raw[1..].copy_from_slice(script_hash);
    bs58::encode(raw).with_check().into_string()
}

/// Decode a Base58Check address into its version byte and 20-byte hash.
pub fn decode_base58(address: &str) -> Result<(u8, [u8; 20])> {
    let raw = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| CryptoError::InvalidAddress)?;
    if raw.len() != 21 {
        return Err(CryptoError::InvalidAddress);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&raw[1..]);
    Ok((raw[0], hash))
}

/// Native segwit v0 address for a witness program.
pub fn segwit_v0(hrp: &str, program: &[u8]) -> Result<String> {
    let mut data = vec![bech32::u5::try_from_u8(0).map_err(|_| CryptoError::InvalidAddress)?];
    data.extend_from_slice(&program.to_base32());
    bech32::encode(hrp, data, Variant::Bech32).map_err(|_| CryptoError::InvalidAddress)
}

/// Decode a segwit v0 address into its witness program.
pub fn decode_segwit_v0(hrp: &str, address: &str) -> Result<Vec<u8>> {
    let (got_hrp, data, variant) =
        bech32::decode(address).map_err(|_| CryptoError::InvalidAddress)?;
    if got_hrp != hrp || variant != Variant::Bech32 || data.is_empty() {
        return Err(CryptoError::InvalidAddress);
    }
    if data[0].to_u8() != 0 {
        return Err(CryptoError::InvalidAddress);
    }
    let program = Vec::<u8>::from_base32(&data[1..]).map_err(|_| CryptoError::InvalidAddress)?;
    if program.len() != 20 && program.len() != 32 {
        return Err(CryptoError::InvalidAddress);
    }
    Ok(program)
}

/// Cosmos account address: bech32 over hash160 of the compressed key.
pub fn cosmos(hrp: &str, public_key: &[u8; 33]) -> Result<String> {
    bech32::encode(hrp, hash160(public_key).to_base32(), Variant::Bech32)
        .map_err(|_| CryptoError::InvalidAddress)
}

/// Raw 20-byte Ethereum address from a compressed public key.
pub fn ethereum_pubkeyhash(public_key: &[u8; 33]) -> Result<[u8; 20]> {
    use k256::elliptic_curve::sec1::ToEncodedPoint;
    let key = k256::PublicKey::from_sec1_bytes(public_key)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let uncompressed = key.to_encoded_point(false);
    // Skip the 0x04 tag; keccak the 64-byte coordinates, keep the tail.
    let digest = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Ok(out)
}

/// EIP-55 checksummed hex rendering of a raw Ethereum address.
#[must_use]
pub fn eip55(address: &[u8; 20]) -> String {
    let lower = hex_lower(address);
    let digest = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0F;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from_digit(u32::from(b >> 4), 16).unwrap_or('0'));
        out.push(char::from_digit(u32::from(b & 0x0F), 16).unwrap_or('0'));
    }
    out
}

/// Multisig redeem script: `OP_m <pubkeys> OP_n OP_CHECKMULTISIG`.
pub fn multisig_redeem_script(pubkeys: &[Vec<u8>], m: u32) -> Result<Vec<u8>> {
    let n = pubkeys.len() as u32;
    if m == 0 || m > n || n > 15 {
        return Err(CryptoError::InvalidAddress);
    }
    let mut script = Vec::with_capacity(3 + pubkeys.len() * 34);
    script.push(0x50 + m as u8); // OP_1..OP_15
    for key in pubkeys {
        if key.len() != 33 {
            return Err(CryptoError::InvalidPublicKey);
        }
        script.push(33);
        script.extend_from_slice(key);
    }
    script.push(0x50 + n as u8);
    script.push(0xAE); // OP_CHECKMULTISIG
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash160_vector() {
        // hash160 of the empty string.
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn base58_round_trip() {
        let hash = [0x42u8; 20];
        let address = p2sh(&hash, 5);
        let (version, decoded) = decode_base58(&address).unwrap();
        assert_eq!(version, 5);
        assert_eq!(decoded, hash);
    }

    #[test]
    fn segwit_round_trip() {
        let program = [0x17u8; 20];
        let address = segwit_v0("bc", &program).unwrap();
        assert!(address.starts_with("bc1q"));
        assert_eq!(decode_segwit_v0("bc", &address).unwrap(), program);
    }

    #[test]
    fn eip55_reference_vector() {
        let mut address = [0u8; 20];
        address.copy_from_slice(&hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap());
        assert_eq!(eip55(&address), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn multisig_script_shape() {
        let keys = vec![vec![0x02; 33], vec![0x03; 33]];
        let script = multisig_redeem_script(&keys, 2).unwrap();
        assert_eq!(script[0], 0x52);
        assert_eq!(script[script.len() - 2], 0x52);
        assert_eq!(script[script.len() - 1], 0xAE);
        assert!(multisig_redeem_script(&keys, 3).is_err());
    }
}
