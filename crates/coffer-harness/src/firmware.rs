//! Firmware image builder for upload scenarios.

use coffer_core::upload::HASH_PREFIX_LEN;
use coffer_crypto::ecdsa;
use sha2::{Digest, Sha256};

/// Builds application images with a meta header, signatures and the
/// in-band hash prefix, using the development signing keys.
pub struct FirmwareImage {
    code: Vec<u8>,
    sign_with: Option<[u8; 3]>,
    flags: u8,
    corrupt_magic: bool,
    corrupt_hash: bool,
}

impl FirmwareImage {
    /// Image with `code_len` bytes of recognizable code.
    #[must_use]
    pub fn with_code_len(code_len: usize) -> Self {
        let code = (0..code_len).map(|i| (i % 251) as u8).collect();
        Self { code, sign_with: None, flags: 0, corrupt_magic: false, corrupt_hash: false }
    }

    /// Sign with three development key indices (1-based, distinct).
    #[must_use]
    pub fn signed(mut self, indices: [u8; 3]) -> Self {
        self.sign_with = Some(indices);
        self
    }

    /// Set the meta flags byte (bit 0 requests storage preservation).
    #[must_use]
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Break the image magic.
    #[must_use]
    pub fn broken_magic(mut self) -> Self {
        self.corrupt_magic = true;
        self
    }

    /// Declare a wrong hash in the upload prefix.
    #[must_use]
    pub fn broken_hash(mut self) -> Self {
        self.corrupt_hash = true;
        self
    }

    /// The raw `FirmwareUpload` payload: `[expected hash][image]`.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; 0x100];
        image[..4].copy_from_slice(if self.corrupt_magic { b"XXXX" } else { b"KPKY" });
        image[4..8].copy_from_slice(&(self.code.len() as u32).to_le_bytes());
        image[11] = self.flags;
        if let Some(indices) = self.sign_with {
            image[8] = indices[0];
            image[9] = indices[1];
            image[10] = indices[2];
            let digest: [u8; 32] = Sha256::digest(&self.code).into();
            for (slot, &index) in [0x40usize, 0x80, 0xC0].iter().zip(&indices) {
                // Development keys: the secret behind key N is the scalar
                // N + 1.
                let mut secret = [0u8; 32];
                secret[31] = index + 1;
                #[allow(clippy::expect_used)]
                let signature =
                    ecdsa::sign_compact(&secret, &digest).expect("dev key signs");
                image[*slot..*slot + 64].copy_from_slice(&signature);
            }
        }
        image.extend_from_slice(&self.code);

        let mut declared: [u8; 32] = Sha256::digest(&image).into();
        if self.corrupt_hash {
            declared[0] ^= 0xFF;
        }
        let mut payload = declared.to_vec();
        payload.extend_from_slice(&image);
        debug_assert_eq!(payload.len(), image.len() + HASH_PREFIX_LEN as usize);
        payload
    }
}
