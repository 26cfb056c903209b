//! Seed recovery sessions.
//!
//! Two ways back in: plain word-by-word entry over `WordRequest`/`WordAck`,
//! and the substitution-cipher flow where the device displays a freshly
//! scrambled alphabet for every character and the host only ever sees
//! ciphertext. Either way the sentence is validated before anything is
//! committed.

use coffer_proto::{messages::provision::CharacterRequest, FailureCode};
use zeroize::Zeroize;

use crate::{device::Interrupt, entropy::Entropy};

/// Settings applied to storage once recovery succeeds.
#[derive(Debug, Clone, Default)]
pub struct RecoverySettings {
    /// Enable passphrase protection afterwards.
    pub passphrase_protection: bool,
    /// Display language.
    pub language: Option<String>,
    /// Device label.
    pub label: Option<String>,
    /// Reject words outside the BIP-39 wordlist.
    pub enforce_wordlist: bool,
    /// PIN collected up front, applied at commit.
    pub pin: Option<String>,
}

/// Whichever recovery flow is active.
pub enum RecoverySession {
    /// Sequential word entry.
    Word(WordRecovery),
    /// Substitution-cipher character entry.
    Cipher(CipherRecovery),
}

/// Word-by-word recovery.
pub struct WordRecovery {
    settings: RecoverySettings,
    word_count: u32,
    words: Vec<String>,
}

impl WordRecovery {
    /// Start a word recovery for a 12, 18 or 24 word sentence.
    pub fn new(word_count: u32, settings: RecoverySettings) -> Result<Self, Interrupt> {
        if !matches!(word_count, 12 | 18 | 24) {
            return Err(Interrupt::failed(
                FailureCode::SyntaxError,
                "Word count must be 12, 18 or 24",
            ));
        }
        Ok(Self { settings, word_count, words: Vec::with_capacity(word_count as usize) })
    }

    /// Accept one word. Returns the finished sentence after the last one.
    pub fn word(&mut self, word: &str) -> Result<Option<String>, Interrupt> {
        let normalized = word.trim().to_lowercase();
        if normalized.is_empty() || !normalized.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "Invalid word"));
        }
        self.words.push(normalized);
        if (self.words.len() as u32) < self.word_count {
            return Ok(None);
        }

        let sentence = self.words.join(" ");
        if self.settings.enforce_wordlist {
            coffer_crypto::mnemonic::check(&sentence).map_err(|_| {
                Interrupt::failed(
                    FailureCode::SyntaxError,
                    "Invalid mnemonic, are words in correct order?",
                )
            })?;
        }
        Ok(Some(sentence))
    }

    /// Hand the settings over for the final commit.
    #[must_use]
    pub fn into_settings(self) -> RecoverySettings {
        self.settings
    }
}

/// Substitution-cipher recovery.
///
/// The cipher maps displayed characters to real ones: position `i` of the
/// scrambled string shows where letter `'a' + i` moved. The host sends the
/// *displayed* character; the device maps it back. A fresh scramble after
/// every keystroke stops the host from learning the mapping.
pub struct CipherRecovery {
    settings: RecoverySettings,
    mnemonic: String,
    cipher: [u8; 26],
}

impl Drop for CipherRecovery {
    fn drop(&mut self) {
        self.mnemonic.zeroize();
    }
}

impl CipherRecovery {
    /// Start a cipher recovery with a first scrambled alphabet.
    pub fn new(settings: RecoverySettings, entropy: &mut impl Entropy) -> Self {
        let mut session = Self { settings, mnemonic: String::new(), cipher: [0; 26] };
        session.scramble(entropy);
        session
    }

    fn scramble(&mut self, entropy: &mut impl Entropy) {
        let mut alphabet = *b"abcdefghijklmnopqrstuvwxyz";
        entropy.shuffle(&mut alphabet);
        self.cipher = alphabet;
    }

    /// The cipher currently displayed.
    #[must_use]
    pub fn cipher_string(&self) -> String {
        String::from_utf8_lossy(&self.cipher).into_owned()
    }

    /// Display hint: word number and masked progress of the current word.
    #[must_use]
    pub fn word_hint(&self) -> String {
        let word_number = self.mnemonic.split(' ').count();
        let current = self.mnemonic.rsplit(' ').next().unwrap_or("");
        let mut hint = format!("{word_number}.{current}");
        for _ in current.len()..8 {
            hint.push('-');
        }
        hint
    }

    /// Wire request for the next character.
    #[must_use]
    pub fn request(&self) -> CharacterRequest {
        let word_pos = self.mnemonic.split(' ').count().saturating_sub(1) as u32;
        let character_pos = self.mnemonic.rsplit(' ').next().unwrap_or("").len() as u32;
        CharacterRequest { word_pos, character_pos }
    }

    /// Accept one ciphered character (or a space ending the word).
    pub fn character(
        &mut self,
        character: &str,
        entropy: &mut impl Entropy,
    ) -> Result<(), Interrupt> {
        let Some(ch) = character.chars().next() else {
            return Err(Interrupt::failed(FailureCode::SyntaxError, "Empty character"));
        };
        if ch == ' ' {
            if !self.mnemonic.is_empty() && !self.mnemonic.ends_with(' ') {
                self.mnemonic.push(' ');
            }
        } else {
            let Some(position) = self.cipher.iter().position(|&c| c == ch as u8) else {
                return Err(Interrupt::failed(
                    FailureCode::SyntaxError,
                    "Character must be from a to z",
                ));
            };
            self.mnemonic.push(char::from(b'a' + position as u8));
        }
        self.scramble(entropy);
        Ok(())
    }

    /// Delete the previously entered character.
    pub fn delete(&mut self, entropy: &mut impl Entropy) {
        self.mnemonic.pop();
        self.scramble(entropy);
    }

    /// Finish entry, validating the sentence.
    pub fn finalize(mut self) -> Result<(String, RecoverySettings), Interrupt> {
        let sentence = self.mnemonic.trim().to_owned();
        if self.settings.enforce_wordlist {
            coffer_crypto::mnemonic::check(&sentence).map_err(|_| {
                Interrupt::failed(
                    FailureCode::SyntaxError,
                    "Invalid mnemonic, are words in correct order?",
                )
            })?;
        }
        Ok((sentence, std::mem::take(&mut self.settings)))
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
                self.0 = self.0.wrapping_add(13);
            }
        }
    }

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn word_recovery_collects_and_validates() {
        let mut recovery = WordRecovery::new(
            12,
            RecoverySettings { enforce_wordlist: true, ..Default::default() },
        )
        .unwrap();
        for word in ABANDON.split(' ').take(11) {
            assert_eq!(recovery.word(word).unwrap(), None);
        }
        let sentence = recovery.word("about").unwrap().unwrap();
        assert_eq!(sentence, ABANDON);
    }

    #[test]
    fn word_recovery_rejects_bad_checksum() {
        let mut recovery = WordRecovery::new(
            12,
            RecoverySettings { enforce_wordlist: true, ..Default::default() },
        )
        .unwrap();
        for _ in 0..11 {
            recovery.word("abandon").unwrap();
        }
        assert!(recovery.word("abandon").is_err());
    }

    #[test]
    fn word_recovery_without_enforcement_accepts_anything() {
        let mut recovery = WordRecovery::new(12, RecoverySettings::default()).unwrap();
        for _ in 0..11 {
            recovery.word("zzz").unwrap();
        }
        assert!(recovery.word("zzz").unwrap().is_some());
    }

    #[test]
    fn bad_word_count_rejected() {
        assert!(WordRecovery::new(13, RecoverySettings::default()).is_err());
    }

    /// Type a plaintext string through the cipher like a user following
    /// the display would.
    fn type_through_cipher(
        recovery: &mut CipherRecovery,
        entropy: &mut Counter,
        plaintext: &str,
    ) {
        for ch in plaintext.chars() {
            if ch == ' ' {
                recovery.character(" ", entropy).unwrap();
            } else {
                let index = (ch as u8 - b'a') as usize;
                let displayed = recovery.cipher[index] as char;
                recovery.character(&displayed.to_string(), entropy).unwrap();
            }
        }
    }

    #[test]
    fn cipher_recovery_round_trips_the_sentence() {
        let mut entropy = Counter(3);
        let mut recovery = CipherRecovery::new(
            RecoverySettings { enforce_wordlist: true, ..Default::default() },
            &mut entropy,
        );
        type_through_cipher(&mut recovery, &mut entropy, ABANDON);
        let (sentence, _) = recovery.finalize().unwrap();
        assert_eq!(sentence, ABANDON);
    }

    #[test]
    fn cipher_changes_every_keystroke() {
        let mut entropy = Counter(9);
        let mut recovery = CipherRecovery::new(RecoverySettings::default(), &mut entropy);
        let before = recovery.cipher_string();
        let displayed = recovery.cipher[0] as char;
        recovery.character(&displayed.to_string(), &mut entropy).unwrap();
        assert_ne!(recovery.cipher_string(), before);
    }

    #[test]
    fn cipher_rejects_foreign_characters() {
        let mut entropy = Counter(1);
        let mut recovery = CipherRecovery::new(RecoverySettings::default(), &mut entropy);
        assert!(recovery.character("7", &mut entropy).is_err());
        assert!(recovery.character("", &mut entropy).is_err());
    }

    #[test]
    fn delete_removes_last_character() {
        let mut entropy = Counter(4);
        let mut recovery = CipherRecovery::new(RecoverySettings::default(), &mut entropy);
        type_through_cipher(&mut recovery, &mut entropy, "ab");
        recovery.delete(&mut entropy);
        let request = recovery.request();
        assert_eq!(request.word_pos, 0);
        assert_eq!(request.character_pos, 1);
    }

    #[test]
    fn word_hint_masks_progress() {
        let mut entropy = Counter(2);
        let mut recovery = CipherRecovery::new(RecoverySettings::default(), &mut entropy);
        type_through_cipher(&mut recovery, &mut entropy, "zoo");
        assert_eq!(recovery.word_hint(), "1.zoo-----");
    }
}
