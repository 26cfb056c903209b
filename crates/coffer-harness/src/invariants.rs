//! Behavioral invariants over device snapshots.
//!
//! These capture WHAT must always hold, independent of the scenario that
//! ran. Drivers snapshot the device after every step and run the whole
//! registry; the first violation fails the run with a description.

use coffer_core::{
    device::Device,
    flash::Flash,
    storage::{Storage, StorageRecord},
    DeviceInstant, Entropy,
};
use coffer_proto::Message;

/// Observable state extracted from a device and its flash.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    /// Seed present as a mnemonic (from the committed record).
    pub has_mnemonic: bool,
    /// Seed present as a raw node (from the committed record).
    pub has_node: bool,
    /// Committed PIN failure counter.
    pub pin_failed_attempts: u32,
    /// Committed wear-rotation counter.
    pub commit_seq: u32,
    /// Any valid slot present at all.
    pub storage_valid: bool,
}

impl DeviceSnapshot {
    /// Snapshot the committed record straight off the flash.
    pub fn capture<F: Flash, E: Entropy, I: DeviceInstant>(device: &Device<F, E, I>) -> Self {
        let raw = Storage::read_active_raw(device.flash_ref()).ok().flatten();
        let record = raw.as_deref().and_then(StorageRecord::parse);
        Self {
            has_mnemonic: record.as_ref().is_some_and(|r| r.mnemonic().is_some()),
            has_node: record.as_ref().is_some_and(|r| r.node().is_some()),
            pin_failed_attempts: record.as_ref().map_or(0, StorageRecord::pin_failed_attempts),
            commit_seq: record.as_ref().map_or(0, StorageRecord::commit_seq),
            storage_valid: record.is_some(),
        }
    }
}

/// A broken invariant.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Which invariant failed.
    pub invariant: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// One behavioral invariant.
pub trait Invariant {
    /// Stable name for reporting.
    fn name(&self) -> &'static str;

    /// Check a step: previous snapshot, new snapshot, and the full reply
    /// history of the run so far.
    fn check(
        &self,
        before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        replies: &[Message],
    ) -> Result<(), Violation>;
}

/// At most one of mnemonic/node is ever committed.
pub struct ExclusiveSeed;

impl Invariant for ExclusiveSeed {
    fn name(&self) -> &'static str {
        "exclusive-seed"
    }

    fn check(
        &self,
        _before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        _replies: &[Message],
    ) -> Result<(), Violation> {
        if after.has_mnemonic && after.has_node {
            return Err(Violation {
                invariant: self.name(),
                message: "both mnemonic and node present after commit".into(),
            });
        }
        Ok(())
    }
}

/// The PIN failure counter never decreases except to zero (correct entry
/// or wipe).
pub struct PinFailsMonotone;

impl Invariant for PinFailsMonotone {
    fn name(&self) -> &'static str {
        "pin-fails-monotone"
    }

    fn check(
        &self,
        before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        _replies: &[Message],
    ) -> Result<(), Violation> {
        if after.pin_failed_attempts < before.pin_failed_attempts
            && after.pin_failed_attempts != 0
        {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "pin fail counter fell {} -> {}",
                    before.pin_failed_attempts, after.pin_failed_attempts
                ),
            });
        }
        Ok(())
    }
}

/// A valid storage slot never disappears (commits replace, wipes
/// re-provision).
pub struct StorageAlwaysReadable;

impl Invariant for StorageAlwaysReadable {
    fn name(&self) -> &'static str {
        "storage-always-readable"
    }

    fn check(
        &self,
        before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        _replies: &[Message],
    ) -> Result<(), Violation> {
        if before.storage_valid && !after.storage_valid {
            return Err(Violation {
                invariant: self.name(),
                message: "storage became unreadable".into(),
            });
        }
        Ok(())
    }
}

/// No signature material leaves the device without prior consent replies.
///
/// Coarse wire-level form of the no-sign-without-confirmation property: a
/// `TxRequest` carrying a signature must be preceded (same run) by at
/// least one `ButtonRequest`.
pub struct NoSilentSignature;

impl Invariant for NoSilentSignature {
    fn name(&self) -> &'static str {
        "no-silent-signature"
    }

    fn check(
        &self,
        _before: &DeviceSnapshot,
        _after: &DeviceSnapshot,
        replies: &[Message],
    ) -> Result<(), Violation> {
        let mut button_seen = false;
        for message in replies {
            match message {
                Message::ButtonRequest(_) => button_seen = true,
                Message::TxRequest(req)
                    if req.serialized.as_ref().is_some_and(|s| s.signature.is_some()) =>
                {
                    if !button_seen {
                        return Err(Violation {
                            invariant: self.name(),
                            message: "signature emitted without any ButtonRequest".into(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The standard registry.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl InvariantRegistry {
    /// All standard invariants.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            invariants: vec![
                Box::new(ExclusiveSeed),
                Box::new(PinFailsMonotone),
                Box::new(StorageAlwaysReadable),
                Box::new(NoSilentSignature),
            ],
        }
    }

    /// Check every invariant for one step.
    pub fn check_step(
        &self,
        before: &DeviceSnapshot,
        after: &DeviceSnapshot,
        replies: &[Message],
    ) -> Result<(), Violation> {
        for invariant in &self.invariants {
            invariant.check(before, after, replies)?;
        }
        Ok(())
    }
}
