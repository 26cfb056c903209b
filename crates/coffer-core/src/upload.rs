//! Firmware-upload engine.
//!
//! ```text
//! NOT_STARTED --first segment--> STARTED --offset reaches length--> COMPLETE
//!      |                            |
//!      └──── any error ────────────-┴──────────> ERROR (sticky)
//! ```
//!
//! The raw `FirmwareUpload` payload is a 32-byte expected SHA-256 followed
//! by the image; the image opens with the 256-byte meta header whose
//! `"KPKY"` magic doubles as the commit token. The magic is *not* written
//! while streaming: only after the signature check, the hash check and the
//! user's fingerprint confirmation does [`UploadEngine::commit_magic`]
//! make the image bootable. An interrupted or rejected upload therefore
//! leaves no valid image, and the bootloader re-enters update mode on the
//! next boot.

use coffer_crypto::ecdsa;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::flash::{
    layout::{self, meta, Allocation, FLASH_APP_START, META_DESC_LEN, META_MAGIC},
    Flash,
};

/// Built-in firmware signing keys (development set; provisioning installs
/// the production keys). Signature key indices are 1-based into this
/// table.
pub const FIRMWARE_KEYS: [[u8; 33]; 5] = [
    [
        0x02, 0xC6, 0x04, 0x7F, 0x94, 0x41, 0xED, 0x7D, 0x6D, 0x30, 0x45, 0x40, 0x6E, 0x95,
        0xC0, 0x7C, 0xD8, 0x5C, 0x77, 0x8E, 0x4B, 0x8C, 0xEF, 0x3C, 0xA7, 0xAB, 0xAC, 0x09,
        0xB9, 0x5C, 0x70, 0x9E, 0xE5,
    ],
    [
        0x02, 0xF9, 0x30, 0x8A, 0x01, 0x92, 0x58, 0xC3, 0x10, 0x49, 0x34, 0x4F, 0x85, 0xF8,
        0x9D, 0x52, 0x29, 0xB5, 0x31, 0xC8, 0x45, 0x83, 0x6F, 0x99, 0xB0, 0x86, 0x01, 0xF1,
        0x13, 0xBC, 0xE0, 0x36, 0xF9,
    ],
    [
        0x02, 0xE4, 0x93, 0xDB, 0xF1, 0xC1, 0x0D, 0x80, 0xF3, 0x58, 0x1E, 0x49, 0x04, 0x93,
        0x0B, 0x14, 0x04, 0xCC, 0x6C, 0x13, 0x90, 0x0E, 0xE0, 0x75, 0x84, 0x74, 0xFA, 0x94,
        0xAB, 0xE8, 0xC4, 0xCD, 0x13,
    ],
    [
        0x02, 0x2F, 0x8B, 0xDE, 0x4D, 0x1A, 0x07, 0x20, 0x93, 0x55, 0xB4, 0xA7, 0x25, 0x0A,
        0x5C, 0x51, 0x28, 0xE8, 0x8B, 0x84, 0xBD, 0xDC, 0x61, 0x9A, 0xB7, 0xCB, 0xA8, 0xD5,
        0x69, 0xB2, 0x40, 0xEF, 0xE4,
    ],
    [
        0x03, 0xFF, 0xF9, 0x7B, 0xD5, 0x75, 0x5E, 0xEE, 0xA4, 0x20, 0x45, 0x3A, 0x14, 0x35,
        0x52, 0x35, 0xD3, 0x82, 0xF6, 0x47, 0x2F, 0x85, 0x68, 0xA1, 0x8B, 0x2F, 0x05, 0x7A,
        0x14, 0x60, 0x29, 0x75, 0x56,
    ],
];

/// Signatures required on an image.
pub const SIG_COUNT: usize = 3;

/// Length of the in-band hash prefix before the image.
pub const HASH_PREFIX_LEN: u32 = 32;

/// Where the upload engine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing received.
    NotStarted,
    /// Streaming segments into flash.
    Started,
    /// Full image written, validation pending.
    Complete,
    /// Magic committed; upload finished.
    Finished,
    /// Failed; sticky until reboot.
    Error,
}

/// Errors during streaming or validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Image magic missing.
    #[error("Not valid firmware")]
    NotValidFirmware,

    /// Image does not fit the application region.
    #[error("Firmware too large")]
    TooLarge,

    /// First segment too short to carry the hash and magic.
    #[error("Upload header truncated")]
    RuntHeader,

    /// Flash programming failed.
    #[error("Encountered error while writing to flash")]
    FlashWrite,

    /// Segment arrived in a state that cannot accept one.
    #[error("Upload not in progress")]
    NotInProgress,
}

/// What one accepted segment produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// More segments expected.
    InProgress,
    /// Image fully written; validation may begin.
    Complete,
}

/// Streamed flash write of an application image.
pub struct UploadEngine {
    state: UploadState,
    image_len: u32,
    offset: u32,
    expected_hash: [u8; 32],
}

impl Default for UploadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadEngine {
    /// Fresh engine.
    #[must_use]
    pub fn new() -> Self {
        Self { state: UploadState::NotStarted, image_len: 0, offset: 0, expected_hash: [0; 32] }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Latch the sticky error state.
    pub fn mark_error(&mut self) {
        self.state = UploadState::Error;
    }

    /// Expected image hash parsed from the stream.
    #[must_use]
    pub fn expected_hash(&self) -> &[u8; 32] {
        &self.expected_hash
    }

    /// Feed one raw segment.
    ///
    /// `declared_total` is the total payload length from the frame header
    /// (hash prefix included). The magic bytes are verified in the stream
    /// but left unwritten; flash stays locked outside the write itself.
    pub fn segment<F: Flash>(
        &mut self,
        flash: &mut F,
        bytes: &[u8],
        declared_total: u32,
    ) -> Result<SegmentOutcome, UploadError> {
        match self.state {
            UploadState::NotStarted => self.first_segment(flash, bytes, declared_total),
            UploadState::Started => self.write_chunk(flash, bytes),
            // A stream racing a sticky error is drained silently; the
            // failure was already reported.
            UploadState::Error => Ok(SegmentOutcome::InProgress),
            UploadState::Complete | UploadState::Finished => Err(UploadError::NotInProgress),
        }
    }

    fn first_segment<F: Flash>(
        &mut self,
        flash: &mut F,
        bytes: &[u8],
        declared_total: u32,
    ) -> Result<SegmentOutcome, UploadError> {
        let image_len = declared_total.saturating_sub(HASH_PREFIX_LEN);
        if declared_total < HASH_PREFIX_LEN + META_DESC_LEN {
            self.state = UploadState::Error;
            return Err(UploadError::NotValidFirmware);
        }
        if image_len > META_DESC_LEN + layout::FLASH_APP_CODE_LEN {
            self.state = UploadState::Error;
            return Err(UploadError::TooLarge);
        }
        if bytes.len() < (HASH_PREFIX_LEN + 4) as usize {
            self.state = UploadState::Error;
            return Err(UploadError::RuntHeader);
        }

        self.expected_hash.copy_from_slice(&bytes[..HASH_PREFIX_LEN as usize]);
        let image = &bytes[HASH_PREFIX_LEN as usize..];
        if &image[..4] != META_MAGIC {
            self.state = UploadState::Error;
            return Err(UploadError::NotValidFirmware);
        }

        self.image_len = image_len;
        self.offset = 0;
        self.state = UploadState::Started;
        tracing::info!(image_len, "firmware upload started");
        self.write_chunk(flash, image)
    }

    fn write_chunk<F: Flash>(
        &mut self,
        flash: &mut F,
        bytes: &[u8],
    ) -> Result<SegmentOutcome, UploadError> {
        if self.offset + bytes.len() as u32 > self.image_len {
            self.state = UploadState::Error;
            return Err(UploadError::TooLarge);
        }

        // Never program the magic word; it is the commit token.
        let (skip, rest) = if self.offset < 4 {
            let skip = (4 - self.offset).min(bytes.len() as u32) as usize;
            (skip, &bytes[skip..])
        } else {
            (0, bytes)
        };
        if !rest.is_empty() {
            let address = FLASH_APP_START + self.offset + skip as u32;
            flash.unlock();
            let written = flash.write(address, rest);
            flash.lock();
            if written.is_err() {
                self.state = UploadState::Error;
                return Err(UploadError::FlashWrite);
            }
        }
        self.offset += bytes.len() as u32;

        if self.offset >= self.image_len {
            self.state = UploadState::Complete;
            tracing::info!("firmware image fully written");
            Ok(SegmentOutcome::Complete)
        } else {
            Ok(SegmentOutcome::InProgress)
        }
    }

    /// Verify the three meta-header signatures against the built-in keys.
    ///
    /// The signed digest is the SHA-256 of the code region (everything
    /// after the meta header, as declared by `code_len`). Requires three
    /// distinct key indices and three verifying signatures.
    pub fn signatures_ok<F: Flash>(&self, flash: &F) -> bool {
        let Ok(code_len_bytes) = flash.read_array::<4>(FLASH_APP_START + meta::CODE_LEN) else {
            return false;
        };
        let code_len = u32::from_le_bytes(code_len_bytes);
        if code_len == 0 || META_DESC_LEN + code_len > self.image_len {
            return false;
        }

        let Ok(indices) = flash.read_array::<3>(FLASH_APP_START + meta::SIG_INDEX1) else {
            return false;
        };
        let distinct = indices[0] != indices[1] && indices[0] != indices[2] && indices[1] != indices[2];
        if !distinct || indices.iter().any(|&i| i == 0 || i as usize > FIRMWARE_KEYS.len()) {
            return false;
        }

        let mut code = vec![0u8; code_len as usize];
        if flash.read(FLASH_APP_START + META_DESC_LEN, &mut code).is_err() {
            return false;
        }
        let digest: [u8; 32] = Sha256::digest(&code).into();

        for (slot, &key_index) in [meta::SIG1, meta::SIG2, meta::SIG3].iter().zip(&indices) {
            let Ok(signature) = flash.read_array::<64>(FLASH_APP_START + slot) else {
                return false;
            };
            let key = &FIRMWARE_KEYS[key_index as usize - 1];
            if ecdsa::verify_compact(key, &digest, &signature).is_err() {
                return false;
            }
        }
        true
    }

    /// Meta-header flags byte of the flashed image.
    pub fn image_flags<F: Flash>(&self, flash: &F) -> u8 {
        flash.read_array::<1>(FLASH_APP_START + meta::FLAGS).map_or(0, |b| b[0])
    }

    /// SHA-256 of the flashed image, with the unwritten magic filled in.
    pub fn flashed_hash<F: Flash>(&self, flash: &F) -> Option<[u8; 32]> {
        let body_len = self.image_len.checked_sub(4)? as usize;
        let mut body = vec![0u8; body_len];
        flash.read(FLASH_APP_START + 4, &mut body).ok()?;
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, META_MAGIC);
        Digest::update(&mut hasher, &body);
        Some(hasher.finalize().into())
    }

    /// Compare the flashed image against the in-band expected hash.
    pub fn hash_matches<F: Flash>(&self, flash: &F) -> bool {
        self.flashed_hash(flash) == Some(self.expected_hash)
    }

    /// Write the magic commit token. Only call after every check passed.
    pub fn commit_magic<F: Flash>(&mut self, flash: &mut F) -> Result<(), UploadError> {
        flash.unlock();
        let written = flash.write(FLASH_APP_START, META_MAGIC);
        flash.lock();
        written.map_err(|_| UploadError::FlashWrite)?;
        self.state = UploadState::Finished;
        tracing::info!("firmware magic committed");
        Ok(())
    }

    /// True when a valid magic is present in the meta header.
    pub fn magic_present<F: Flash>(flash: &F) -> bool {
        flash.read_array::<4>(FLASH_APP_START).map_or(false, |magic| &magic == META_MAGIC)
    }

    /// Erase the storage and application regions ahead of an upload.
    pub fn erase_for_upload<F: Flash>(flash: &mut F) -> Result<(), UploadError> {
        flash.unlock();
        let result = (|| {
            flash.erase(Allocation::StorageA)?;
            flash.erase(Allocation::StorageB)?;
            flash.erase(Allocation::StorageC)?;
            flash.erase(Allocation::App)
        })();
        flash.lock();
        result.map_err(|_| UploadError::FlashWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;

    /// Build a signed image of `code_len` code bytes.
    fn build_image(code_len: usize, sign: bool, flags: u8) -> Vec<u8> {
        let code = vec![0xB7u8; code_len];
        let digest: [u8; 32] = Sha256::digest(&code).into();

        let mut image = vec![0u8; META_DESC_LEN as usize];
        image[..4].copy_from_slice(META_MAGIC);
        image[4..8].copy_from_slice(&(code_len as u32).to_le_bytes());
        image[8] = 1;
        image[9] = 2;
        image[10] = 3;
        image[11] = flags;
        if sign {
            for (i, offset) in [0x40usize, 0x80, 0xC0].iter().enumerate() {
                let mut secret = [0u8; 32];
                secret[31] = i as u8 + 2; // development keys 1..=3
                let signature = ecdsa::sign_compact(&secret, &digest).unwrap();
                image[*offset..*offset + 64].copy_from_slice(&signature);
            }
        }
        image.extend_from_slice(&code);
        image
    }

    /// Prefix the image with its declared hash.
    fn with_hash(image: &[u8]) -> Vec<u8> {
        let digest: [u8; 32] = Sha256::digest(image).into();
        let mut payload = digest.to_vec();
        payload.extend_from_slice(image);
        payload
    }

    fn stream(
        engine: &mut UploadEngine,
        flash: &mut MemFlash,
        payload: &[u8],
    ) -> Result<SegmentOutcome, UploadError> {
        let total = payload.len() as u32;
        let mut outcome = SegmentOutcome::InProgress;
        for chunk in payload.chunks(63) {
            outcome = engine.segment(flash, chunk, total)?;
        }
        Ok(outcome)
    }

    fn erased_flash() -> MemFlash {
        let mut flash = MemFlash::new();
        UploadEngine::erase_for_upload(&mut flash).unwrap();
        flash
    }

    #[test]
    fn good_image_full_flow() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let payload = with_hash(&build_image(4096, true, 0x01));

        assert_eq!(stream(&mut engine, &mut flash, &payload).unwrap(), SegmentOutcome::Complete);
        assert_eq!(engine.state(), UploadState::Complete);
        assert!(engine.signatures_ok(&flash));
        assert!(engine.hash_matches(&flash));
        assert_eq!(engine.image_flags(&flash), 0x01);

        // Magic must not be present until committed.
        assert!(!UploadEngine::magic_present(&flash));
        engine.commit_magic(&mut flash).unwrap();
        assert!(UploadEngine::magic_present(&flash));
        assert_eq!(engine.state(), UploadState::Finished);
    }

    #[test]
    fn missing_magic_rejected() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let mut image = build_image(1024, true, 0);
        image[0] = b'X';
        let payload = with_hash(&image);

        assert_eq!(
            stream(&mut engine, &mut flash, &payload),
            Err(UploadError::NotValidFirmware)
        );
        assert_eq!(engine.state(), UploadState::Error);
        // Sticky: later segments are swallowed without flash writes.
        assert_eq!(
            engine.segment(&mut flash, &[0u8; 63], payload.len() as u32).unwrap(),
            SegmentOutcome::InProgress
        );
    }

    #[test]
    fn unsigned_image_fails_signature_check() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let payload = with_hash(&build_image(1024, false, 0));
        stream(&mut engine, &mut flash, &payload).unwrap();
        assert!(!engine.signatures_ok(&flash));
        assert!(engine.hash_matches(&flash));
    }

    #[test]
    fn duplicate_key_indices_rejected() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let mut image = build_image(1024, true, 0);
        image[9] = 1; // same as index 1
        let payload = with_hash(&image);
        stream(&mut engine, &mut flash, &payload).unwrap();
        assert!(!engine.signatures_ok(&flash));
    }

    #[test]
    fn hash_mismatch_detected() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let image = build_image(1024, true, 0);
        let mut payload = with_hash(&image);
        payload[5] ^= 0xFF; // corrupt the declared hash
        stream(&mut engine, &mut flash, &payload).unwrap();
        assert!(!engine.hash_matches(&flash));
    }

    #[test]
    fn oversized_image_rejected() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        let declared = HASH_PREFIX_LEN + META_DESC_LEN + layout::FLASH_APP_CODE_LEN + 1;
        let result = engine.segment(&mut flash, &[0u8; 63], declared);
        assert_eq!(result, Err(UploadError::TooLarge));
        assert_eq!(engine.state(), UploadState::Error);
    }

    #[test]
    fn tiny_declared_length_rejected() {
        let mut flash = erased_flash();
        let mut engine = UploadEngine::new();
        assert_eq!(
            engine.segment(&mut flash, &[0u8; 40], 100),
            Err(UploadError::NotValidFirmware)
        );
    }
}
