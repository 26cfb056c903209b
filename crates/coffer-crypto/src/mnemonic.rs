//! BIP-39 mnemonic handling.
//!
//! The wordlist and checksum rules come from the `bip39` crate; the seed
//! stretch is PBKDF2-HMAC-SHA512 with 2048 rounds. Deriving a seed takes
//! long enough on device hardware that callers pass a progress hook to
//! keep the display alive.

use bip39::{Language, Mnemonic};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::{CryptoError, Result};

/// PBKDF2 round count fixed by BIP-39.
pub const PBKDF2_ROUNDS: u32 = 2048;

/// Longest mnemonic sentence the device stores.
pub const MAX_MNEMONIC_BYTES: usize = 240;

/// Validate wordlist membership and checksum.
pub fn check(sentence: &str) -> Result<()> {
    Mnemonic::parse_in_normalized(Language::English, sentence)
        .map(|_| ())
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}

/// Generate a mnemonic sentence from raw entropy (16, 24 or 32 bytes).
pub fn from_entropy(entropy: &[u8]) -> Result<String> {
    Mnemonic::from_entropy_in(Language::English, entropy)
        .map(|m| m.to_string())
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}

/// Stretch a mnemonic and passphrase into a 64-byte seed.
///
/// `progress` is called before and after the stretch so the caller can
/// update the display; the stretch itself is a single blocking PBKDF2.
/// The sentence is not checksum-validated here; storage may legitimately
/// hold a checksum-skipped import.
pub fn to_seed(
    sentence: &str,
    passphrase: &str,
    mut progress: impl FnMut(u32, u32),
) -> Zeroizing<[u8; 64]> {
    let mut salt = Zeroizing::new(String::with_capacity(8 + passphrase.len()));
    salt.push_str("mnemonic");
    salt.push_str(passphrase);

    progress(0, PBKDF2_ROUNDS);
    let mut seed = Zeroizing::new([0u8; 64]);
    pbkdf2_hmac::<Sha512>(
        sentence.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ROUNDS,
        seed.as_mut(),
    );
    progress(PBKDF2_ROUNDS, PBKDF2_ROUNDS);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn known_vector_seed() {
        // Trezor/BIP-39 reference vector for the all-abandon sentence with
        // passphrase "TREZOR".
        let seed = to_seed(ABANDON, "TREZOR", |_, _| {});
        assert_eq!(
            hex::encode(&seed[..]),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn empty_passphrase_differs_from_nonempty() {
        let a = to_seed(ABANDON, "", |_, _| {});
        let b = to_seed(ABANDON, "x", |_, _| {});
        assert_ne!(&a[..], &b[..]);
    }

    #[test]
    fn checksum_enforced() {
        assert!(check(ABANDON).is_ok());
        assert!(check("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon").is_err());
        assert!(check("notaword abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about").is_err());
    }

    #[test]
    fn entropy_round_trips_through_words() {
        let entropy = [0u8; 16];
        let sentence = from_entropy(&entropy).unwrap();
        assert_eq!(sentence, ABANDON);
        check(&sentence).unwrap();
    }

    #[test]
    fn progress_hook_called() {
        let mut calls = 0;
        let _ = to_seed(ABANDON, "", |_, _| calls += 1);
        assert_eq!(calls, 2);
    }
}
