//! Persistent storage: triple-slot, wear-rotated, magic-committed.
//!
//! Three interchangeable flash sectors hold candidate record images. The
//! slot whose first four bytes carry the magic and whose `commit_seq` is
//! highest is the live record. Mutations happen on an in-memory shadow;
//! [`Storage::commit`] writes the shadow to the *next* slot in rotation,
//! programming the magic last so a crash anywhere in the sequence leaves
//! the previous record untouched, then erases the previous winner.
//!
//! # Invariants
//!
//! - A slot is valid only when its magic is fully programmed; the magic is
//!   the last word written during a commit.
//! - After any interrupted commit, the previous winner still scans as the
//!   record with the highest `commit_seq`.

pub mod migrate;
pub mod record;

pub use record::{StorageRecord, StoredNode, RECORD_LEN, STORAGE_FORMAT_VERSION};

use thiserror::Error;

use crate::{
    entropy::Entropy,
    flash::{
        layout::{self, Allocation, STORAGE_MAGIC},
        Flash, FlashError, UnlockGuard,
    },
};

/// Storage candidate slots, in rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// First candidate sector.
    A,
    /// Second candidate sector.
    B,
    /// Third candidate sector.
    C,
}

impl Slot {
    /// All slots in rotation order.
    pub const ALL: [Slot; 3] = [Slot::A, Slot::B, Slot::C];

    /// Flash allocation backing this slot.
    #[must_use]
    pub fn allocation(self) -> Allocation {
        match self {
            Slot::A => Allocation::StorageA,
            Slot::B => Allocation::StorageB,
            Slot::C => Allocation::StorageC,
        }
    }

    /// First address of this slot.
    #[must_use]
    pub fn start(self) -> u32 {
        layout::start_of(self.allocation())
    }

    /// Next slot in rotation order.
    #[must_use]
    pub fn next(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::C,
            Slot::C => Slot::A,
        }
    }
}

/// Errors from the storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying flash refused an operation.
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// The live record was written by newer firmware.
    #[error("storage format {0} is newer than this firmware supports")]
    NewerFormat(u32),
}

/// The storage controller: shadow record plus slot bookkeeping.
pub struct Storage {
    shadow: Box<StorageRecord>,
    active: Option<Slot>,
    refused_newer: Option<u32>,
}

impl Storage {
    /// Scan the candidate slots and load (or create) the record.
    ///
    /// With no valid slot the device is fresh: a new record with a random
    /// UUID is committed immediately. Stale valid slots (lower
    /// `commit_seq`) are erased opportunistically.
    pub fn open<F: Flash>(
        flash: &mut F,
        entropy: &mut impl Entropy,
    ) -> Result<Self, StorageError> {
        let mut winner: Option<(Slot, u32)> = None;
        for slot in Slot::ALL {
            if let Some(seq) = scan_slot(flash, slot)? {
                match winner {
                    Some((_, best)) if best >= seq => {}
                    _ => winner = Some((slot, seq)),
                }
            }
        }

        let Some((slot, seq)) = winner else {
            tracing::info!("no valid storage slot, provisioning fresh record");
            let mut storage =
                Self { shadow: Box::new(StorageRecord::fresh()), active: None, refused_newer: None };
            let mut uuid = [0u8; 12];
            entropy.fill(&mut uuid);
            storage.shadow.set_uuid(uuid);
            storage.commit(flash)?;
            return Ok(storage);
        };

        // Losing slots are stale half-commits or leftovers; clear them.
        {
            let mut guard = UnlockGuard::new(flash);
            for other in Slot::ALL {
                if other != slot && scan_slot(&*guard, other)?.is_some() {
                    tracing::debug!(slot = ?other, "erasing stale storage slot");
                    guard.erase(other.allocation())?;
                }
            }
        }

        let mut image = vec![0u8; RECORD_LEN];
        flash.read(slot.start(), &mut image)?;
        match migrate::upgrade(&image) {
            migrate::Upgrade::Ready(shadow) => {
                tracing::debug!(slot = ?slot, commit_seq = seq, "storage record loaded");
                Ok(Self { shadow, active: Some(slot), refused_newer: None })
            }
            migrate::Upgrade::Newer(version) => {
                tracing::warn!(version, "storage record from newer firmware, refusing to open");
                Ok(Self {
                    shadow: Box::new(StorageRecord::fresh()),
                    active: Some(slot),
                    refused_newer: Some(version),
                })
            }
            migrate::Upgrade::Unusable => {
                tracing::warn!(slot = ?slot, "storage record unusable, provisioning fresh");
                let mut storage =
                    Self { shadow: Box::new(StorageRecord::fresh()), active: None, refused_newer: None };
                let mut uuid = [0u8; 12];
                entropy.fill(&mut uuid);
                storage.shadow.set_uuid(uuid);
                storage.commit(flash)?;
                Ok(storage)
            }
        }
    }

    /// The shadow record (read side).
    #[must_use]
    pub fn record(&self) -> &StorageRecord {
        &self.shadow
    }

    /// The shadow record (staging side). Nothing is persisted until
    /// [`Storage::commit`].
    pub fn record_mut(&mut self) -> &mut StorageRecord {
        &mut self.shadow
    }

    /// Slot currently holding the live record.
    #[must_use]
    pub fn active_slot(&self) -> Option<Slot> {
        self.active
    }

    /// True when the live record was refused for being too new.
    #[must_use]
    pub fn refused_newer(&self) -> Option<u32> {
        self.refused_newer
    }

    /// Commit the shadow. See the module docs for the protocol.
    pub fn commit<F: Flash>(&mut self, flash: &mut F) -> Result<(), StorageError> {
        self.commit_with_progress(flash, |_, _| {})
    }

    /// Commit with a progress hook for display animation.
    pub fn commit_with_progress<F: Flash>(
        &mut self,
        flash: &mut F,
        mut progress: impl FnMut(u32, u32),
    ) -> Result<(), StorageError> {
        if let Some(version) = self.refused_newer {
            return Err(StorageError::NewerFormat(version));
        }

        let target = self.active.map_or(Slot::A, Slot::next);
        self.shadow.advance_commit_seq();
        self.shadow.set_magic();

        // Body first with the magic hole left erased; the magic write is
        // the commit token.
        let mut image = *self.shadow;
        image.clear_magic();

        let mut guard = UnlockGuard::new(flash);
        progress(0, 4);
        guard.erase(target.allocation())?;
        progress(1, 4);
        guard.write(target.start() + 4, &zerocopy::IntoBytes::as_bytes(&image)[4..])?;
        progress(2, 4);
        guard.write(target.start(), STORAGE_MAGIC)?;
        progress(3, 4);
        if let Some(previous) = self.active {
            if previous != target {
                guard.erase(previous.allocation())?;
            }
        }
        progress(4, 4);

        tracing::debug!(slot = ?target, commit_seq = self.shadow.commit_seq(), "storage committed");
        self.active = Some(target);
        Ok(())
    }

    /// Erase every candidate slot and commit a fresh record with a new
    /// UUID.
    pub fn wipe<F: Flash>(
        &mut self,
        flash: &mut F,
        entropy: &mut impl Entropy,
    ) -> Result<(), StorageError> {
        {
            let mut guard = UnlockGuard::new(flash);
            for slot in Slot::ALL {
                guard.erase(slot.allocation())?;
            }
        }
        self.shadow = Box::new(StorageRecord::fresh());
        let mut uuid = [0u8; 12];
        entropy.fill(&mut uuid);
        self.shadow.set_uuid(uuid);
        self.active = None;
        self.refused_newer = None;
        self.commit(flash)
    }

    /// Raw bytes of the live record, for the bootloader's RAM shadow.
    pub fn read_active_raw<F: Flash>(flash: &F) -> Result<Option<Vec<u8>>, StorageError> {
        let mut winner: Option<(Slot, u32)> = None;
        for slot in Slot::ALL {
            if let Some(seq) = scan_slot(flash, slot)? {
                match winner {
                    Some((_, best)) if best >= seq => {}
                    _ => winner = Some((slot, seq)),
                }
            }
        }
        let Some((slot, _)) = winner else { return Ok(None) };
        let mut image = vec![0u8; RECORD_LEN];
        flash.read(slot.start(), &mut image)?;
        Ok(Some(image))
    }

    /// Write a saved record image back, magic last. Used by the bootloader
    /// to restore storage after a verified firmware upload.
    pub fn restore_raw<F: Flash>(flash: &mut F, image: &[u8]) -> Result<(), StorageError> {
        if image.len() < 4 || &image[..4] != STORAGE_MAGIC {
            // Nothing worth restoring.
            return Ok(());
        }
        let slot = Slot::A;
        let mut guard = UnlockGuard::new(flash);
        for other in Slot::ALL {
            guard.erase(other.allocation())?;
        }
        guard.write(slot.start() + 4, &image[4..])?;
        guard.write(slot.start(), STORAGE_MAGIC)?;
        Ok(())
    }
}

fn scan_slot<F: Flash>(flash: &F, slot: Slot) -> Result<Option<u32>, StorageError> {
    let magic: [u8; 4] = flash.read_array(slot.start())?;
    if &magic != STORAGE_MAGIC {
        return Ok(None);
    }
    let seq: [u8; 4] = flash.read_array(slot.start() + 4)?;
    Ok(Some(u32::from_le_bytes(seq)))
}
