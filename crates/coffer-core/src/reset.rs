//! On-device seed generation.
//!
//! The seed mixes device entropy with host entropy: the device draws 32
//! internal bytes, asks the host for its contribution via
//! `EntropyRequest`, and the sentence comes from
//! `SHA-256(internal || external)` truncated to the requested strength.
//! Neither side can bias the seed alone.

use coffer_proto::{messages::provision::ResetDevice, FailureCode};
use sha2::{Digest, Sha256};

use crate::{device::Interrupt, entropy::Entropy};

/// State carried between `ResetDevice` and `EntropyAck`.
#[derive(Clone)]
pub struct ResetSession {
    internal_entropy: [u8; 32],
    strength: u32,
    /// Ask for a PIN before committing.
    pub pin_protection: bool,
    /// Enable passphrase protection.
    pub passphrase_protection: bool,
    /// Display language.
    pub language: Option<String>,
    /// Device label.
    pub label: Option<String>,
    /// Show the internal entropy before mixing.
    pub display_random: bool,
}

impl ResetSession {
    /// Validate the request and draw the internal entropy.
    pub fn new(msg: &ResetDevice, entropy: &mut impl Entropy) -> Result<Self, Interrupt> {
        let strength = msg.strength.unwrap_or(128);
        if !matches!(strength, 128 | 192 | 256) {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "Strength must be 128, 192 or 256 bits",
            ));
        }
        let mut internal_entropy = [0u8; 32];
        entropy.fill(&mut internal_entropy);
        Ok(Self {
            internal_entropy,
            strength,
            pin_protection: msg.pin_protection.unwrap_or(false),
            passphrase_protection: msg.passphrase_protection.unwrap_or(false),
            language: msg.language.clone(),
            label: msg.label.clone(),
            display_random: msg.display_random.unwrap_or(false),
        })
    }

    /// The internal entropy, for the optional display step.
    #[must_use]
    pub fn internal_entropy(&self) -> &[u8; 32] {
        &self.internal_entropy
    }

    /// Mix in the host entropy and produce the sentence.
    ///
    /// Deterministic for a given session, so a parked replay regenerates
    /// the exact sentence that was displayed.
    pub fn mnemonic_from(&self, external: &[u8]) -> Result<String, Interrupt> {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, self.internal_entropy);
        Digest::update(&mut hasher, external);
        let mixed: [u8; 32] = hasher.finalize().into();

        let take = (self.strength / 8) as usize;
        coffer_crypto::mnemonic::from_entropy(&mixed[..take])
            .map_err(|e| Interrupt::other(format!("Seed generation failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u8);

    impl Entropy for Counter {
        fn fill(&mut self, buffer: &mut [u8]) {
            for b in buffer {
                *b = self.0;
                self.0 = self.0.wrapping_add(1);
            }
        }
    }

    fn request(strength: u32) -> ResetDevice {
        ResetDevice { strength: Some(strength), ..Default::default() }
    }

    #[test]
    fn strength_controls_word_count() {
        let mut entropy = Counter(0);
        for (strength, words) in [(128, 12), (192, 18), (256, 24)] {
            let session = ResetSession::new(&request(strength), &mut entropy).unwrap();
            let sentence = session.mnemonic_from(b"host").unwrap();
            assert_eq!(sentence.split(' ').count(), words);
            coffer_crypto::mnemonic::check(&sentence).unwrap();
        }
    }

    #[test]
    fn invalid_strength_rejected() {
        let mut entropy = Counter(0);
        assert!(ResetSession::new(&request(129), &mut entropy).is_err());
    }

    #[test]
    fn host_entropy_changes_the_seed() {
        let mut entropy = Counter(0);
        let session = ResetSession::new(&request(128), &mut entropy).unwrap();
        assert_ne!(
            session.mnemonic_from(b"one").unwrap(),
            session.mnemonic_from(b"two").unwrap()
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let mut entropy = Counter(0);
        let session = ResetSession::new(&request(256), &mut entropy).unwrap();
        assert_eq!(
            session.mnemonic_from(b"same").unwrap(),
            session.mnemonic_from(b"same").unwrap()
        );
    }

    #[test]
    fn sessions_differ() {
        let mut entropy = Counter(0);
        let a = ResetSession::new(&request(128), &mut entropy).unwrap();
        let b = ResetSession::new(&request(128), &mut entropy).unwrap();
        assert_ne!(a.mnemonic_from(b"x").unwrap(), b.mnemonic_from(b"x").unwrap());
    }
}
