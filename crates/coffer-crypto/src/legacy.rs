//! Legacy encrypted-node storage format.
//!
//! Early firmware stored the root node with its chain code and private key
//! encrypted under a passphrase-derived key: PBKDF2-HMAC-SHA512 over the
//! passphrase with salt `"TREZORHD"` and 2048 rounds, yielding a 64-byte
//! secret; bytes 0..32 key AES-256-CBC and bytes 32..48 are the IV. Both
//! fields are 32 bytes, so no padding is involved.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const SALT: &[u8] = b"TREZORHD";
const ROUNDS: u32 = 2048;

fn derive_secret(passphrase: &str, mut progress: impl FnMut(u32, u32)) -> Zeroizing<[u8; 64]> {
    progress(0, ROUNDS);
    let mut secret = Zeroizing::new([0u8; 64]);
    pbkdf2_hmac::<Sha512>(passphrase.as_bytes(), SALT, ROUNDS, secret.as_mut());
    progress(ROUNDS, ROUNDS);
    secret
}

/// Decrypt the chain code and private key of a legacy stored node in place.
pub fn decrypt_node_fields(
    passphrase: &str,
    chain_code: &mut [u8; 32],
    private_key: &mut [u8; 32],
    progress: impl FnMut(u32, u32),
) -> Result<()> {
    let secret = derive_secret(passphrase, progress);
    cbc_apply(&secret, chain_code, false)?;
    cbc_apply(&secret, private_key, false)?;
    Ok(())
}

/// Encrypt node fields into the legacy stored form.
pub fn encrypt_node_fields(
    passphrase: &str,
    chain_code: &mut [u8; 32],
    private_key: &mut [u8; 32],
    progress: impl FnMut(u32, u32),
) -> Result<()> {
    let secret = derive_secret(passphrase, progress);
    cbc_apply(&secret, chain_code, true)?;
    cbc_apply(&secret, private_key, true)?;
    Ok(())
}

fn cbc_apply(secret: &[u8; 64], field: &mut [u8; 32], encrypt: bool) -> Result<()> {
    let key = &secret[..32];
    let iv = &secret[32..48];
    if encrypt {
        Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
            .encrypt_padded_mut::<NoPadding>(field, 32)
            .map_err(|_| CryptoError::CipherInput("block alignment"))?;
    } else {
        Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| CryptoError::CipherInput("bad key/iv length"))?
            .decrypt_padded_mut::<NoPadding>(field)
            .map_err(|_| CryptoError::CipherInput("block alignment"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut chain = [0x11u8; 32];
        let mut key = [0x22u8; 32];
        encrypt_node_fields("open sesame", &mut chain, &mut key, |_, _| {}).unwrap();
        assert_ne!(chain, [0x11u8; 32]);
        decrypt_node_fields("open sesame", &mut chain, &mut key, |_, _| {}).unwrap();
        assert_eq!(chain, [0x11u8; 32]);
        assert_eq!(key, [0x22u8; 32]);
    }

    #[test]
    fn wrong_passphrase_garbles() {
        let mut chain = [0x11u8; 32];
        let mut key = [0x22u8; 32];
        encrypt_node_fields("right", &mut chain, &mut key, |_, _| {}).unwrap();
        decrypt_node_fields("wrong", &mut chain, &mut key, |_, _| {}).unwrap();
        assert_ne!(chain, [0x11u8; 32]);
    }
}
