//! Bootloader-mode dispatch table and the firmware-update flow.
//!
//! The bootloader answers exactly `Initialize`, `Ping`, `FirmwareErase`
//! and the raw `FirmwareUpload` stream. Everything else is
//! `UnexpectedMessage`; a wallet cannot be operated from here.

use coffer_proto::{
    messages::device::{ButtonRequestType, Ping},
    FailureCode, Message,
};
use zeroize::Zeroizing;

use super::{ConfirmGate, Device, Interrupt, Parked, Screen};
use crate::{
    clock::DeviceInstant,
    entropy::Entropy,
    flash::Flash,
    storage::Storage,
    upload::{SegmentOutcome, UploadEngine, UploadState},
};

impl<F: Flash, E: Entropy, I: DeviceInstant> Device<F, E, I> {
    pub(super) fn dispatch_boot(&mut self, message: &Message, _now: I) -> Result<(), Interrupt> {
        match message {
            Message::Ping(msg) => self.boot_ping(msg),
            Message::FirmwareErase => self.boot_firmware_erase(),
            #[cfg(feature = "debug-link")]
            Message::DebugLinkGetState => self.boot_debug_link_get_state(),
            #[cfg(feature = "debug-link")]
            Message::DebugLinkStop => Ok(()),
            #[cfg(feature = "debug-link")]
            Message::DebugLinkFillConfig => self.boot_debug_link_fill_config(),
            _ => Err(Interrupt::failed(FailureCode::UnexpectedMessage, "Unknown message")),
        }
    }

    #[cfg(feature = "debug-link")]
    fn boot_debug_link_get_state(&mut self) -> Result<(), Interrupt> {
        use coffer_proto::messages::debug::DebugLinkState;
        use sha2::{Digest, Sha256};

        let firmware_hash = self.upload.flashed_hash(&self.flash).map(|h| h.to_vec());
        let storage_hash = Storage::read_active_raw(&self.flash)
            .ok()
            .flatten()
            .map(|raw| Sha256::digest(&raw).to_vec());
        let state = DebugLinkState { firmware_hash, storage_hash, ..Default::default() };
        self.queue(Message::DebugLinkState(Box::new(state)));
        Ok(())
    }

    /// Fill the storage region with a recognizable pattern, for upload
    /// restore testing.
    #[cfg(feature = "debug-link")]
    fn boot_debug_link_fill_config(&mut self) -> Result<(), Interrupt> {
        use crate::flash::{layout, UnlockGuard};

        let mut guard = UnlockGuard::new(&mut self.flash);
        guard
            .erase(crate::flash::Allocation::StorageA)
            .and_then(|()| {
                let fill = vec![0xAAu8; crate::storage::RECORD_LEN];
                guard.write(layout::start_of(crate::flash::Allocation::StorageA), &fill)
            })
            .map_err(|e| Interrupt::failed(FailureCode::FirmwareError, e.to_string()))?;
        Ok(())
    }

    fn boot_ping(&mut self, msg: &Ping) -> Result<(), Interrupt> {
        self.send_success(msg.message.as_deref().unwrap_or(""));
        Ok(())
    }

    /// Snapshot storage to RAM, then clear the decks for the new image.
    fn boot_firmware_erase(&mut self) -> Result<(), Interrupt> {
        self.confirm(
            ButtonRequestType::FirmwareErase,
            "Verify Backup Before Upgrade",
            "Before upgrading, confirm that you have access to the backup of your recovery sentence.",
        )?;
        self.push_display(Screen::Notify {
            title: "Preparing For Upgrade".into(),
            body: String::new(),
        });

        let shadow = Storage::read_active_raw(&self.flash)
            .map_err(|e| Interrupt::failed(FailureCode::FirmwareError, e.to_string()))?;
        self.storage_shadow = shadow.map(Zeroizing::new);

        UploadEngine::erase_for_upload(&mut self.flash)
            .map_err(|e| Interrupt::failed(FailureCode::FirmwareError, e.to_string()))?;
        tracing::info!("storage and application regions erased for upload");
        self.send_success("Firmware Erased");
        Ok(())
    }

    /// One raw `FirmwareUpload` segment from the framer.
    pub(super) fn upload_segment(&mut self, bytes: &[u8], declared_total: u32) {
        match self.upload.segment(&mut self.flash, bytes, declared_total) {
            Ok(SegmentOutcome::InProgress) => {}
            Ok(SegmentOutcome::Complete) => {
                // Fresh consent scope for the fingerprint confirmation.
                self.granted = 0;
                self.used_grants = 0;
                self.finish_upload();
            }
            Err(error) => {
                tracing::warn!(%error, "firmware upload failed");
                self.storage_shadow = None;
                self.send_failure(FailureCode::FirmwareError, &error.to_string());
            }
        }
    }

    /// Post-upload validation: signatures, storage restore, hash check,
    /// fingerprint confirmation, magic commit.
    ///
    /// Runs once when the image completes and again (with the
    /// confirmation grant recorded) after the user approves the
    /// fingerprint; the checks are read-only so re-running them is free.
    pub(super) fn finish_upload(&mut self) {
        if self.upload.state() != UploadState::Complete {
            return;
        }

        let signatures_ok = self.upload.signatures_ok(&self.flash);
        if !self.upload.hash_matches(&self.flash) {
            self.upload.mark_error();
            self.storage_shadow = None;
            self.send_failure(FailureCode::FirmwareError, "Firmware hash mismatch");
            return;
        }

        let Some(flashed) = self.upload.flashed_hash(&self.flash) else {
            self.upload.mark_error();
            self.storage_shadow = None;
            self.send_failure(FailureCode::FirmwareError, "Firmware hash unreadable");
            return;
        };
        let fingerprint = hex::encode(flashed);

        // Fingerprint confirmation parks the finalization rather than a
        // message; the commit edge re-enters here.
        self.push_display(Screen::Fingerprint { hex: fingerprint.clone() });
        match self.confirm(
            ButtonRequestType::FirmwareCheck,
            "Verify Firmware Fingerprint",
            &fingerprint,
        ) {
            Ok(()) => {}
            Err(Interrupt::Pending) => {
                self.parked = Some(Parked::UploadFinalize);
                return;
            }
            Err(Interrupt::Failed(code, text)) => {
                self.upload.mark_error();
                self.storage_shadow = None;
                self.send_failure(code, &text);
                return;
            }
        }

        // A vendor-signed image that asked for it gets its storage back;
        // anything else boots clean.
        let restore_requested = self.upload.image_flags(&self.flash) & 0x01 != 0;
        if signatures_ok && restore_requested {
            if let Some(shadow) = self.storage_shadow.take() {
                if let Err(error) = Storage::restore_raw(&mut self.flash, &shadow) {
                    tracing::error!(%error, "storage restore failed");
                    self.upload.mark_error();
                    self.send_failure(FailureCode::FirmwareError, "Storage restore failed");
                    return;
                }
                tracing::info!("storage restored after verified upload");
            }
        } else {
            self.storage_shadow = None;
            if !signatures_ok {
                tracing::warn!("unsigned image accepted by fingerprint; storage not restored");
            }
        }

        if self.upload.commit_magic(&mut self.flash).is_err() {
            self.send_failure(FailureCode::FirmwareError, "Could not commit firmware");
            return;
        }
        self.send_success("Upload complete");
        self.go_home();
    }
}
