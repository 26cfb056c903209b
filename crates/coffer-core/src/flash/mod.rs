//! Flash controller abstraction.
//!
//! The real part is small: unlock/lock bracketing, whole-allocation erase,
//! and programming at absolute addresses. The trait models NOR semantics
//! faithfully enough for the storage commit protocol to be tested: erase
//! sets bytes to `0xFF` and programming can only clear bits, so a commit
//! token really cannot appear before it is written.

pub mod layout;

mod mem;

pub use layout::{Allocation, Sector, SECTOR_MAP};
pub use mem::MemFlash;

use thiserror::Error;

/// Errors from the flash controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// Write or erase attempted while the controller was locked.
    #[error("flash locked")]
    Locked,

    /// Address range fell outside the device.
    #[error("address out of range: {address:#010x}+{len}")]
    OutOfRange {
        /// Start address of the attempt.
        address: u32,
        /// Length of the attempt.
        len: usize,
    },

    /// Write or erase touched a write-protected allocation.
    #[error("write-protected sector at {address:#010x}")]
    Protected {
        /// Offending address.
        address: u32,
    },

    /// Controller reported a program failure.
    #[error("flash program failed at {address:#010x}")]
    ProgramFailed {
        /// Offending address.
        address: u32,
    },
}

/// Flash controller operations used by the device core.
pub trait Flash {
    /// Allow writes and erases until [`Flash::lock`].
    fn unlock(&mut self);

    /// Re-protect the flash.
    fn lock(&mut self);

    /// Erase every sector of an allocation to `0xFF`.
    fn erase(&mut self, allocation: Allocation) -> Result<(), FlashError>;

    /// Program bytes at an absolute address. Requires an unlocked
    /// controller and a previously erased range for full-fidelity writes.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read bytes at an absolute address.
    fn read(&self, address: u32, out: &mut [u8]) -> Result<(), FlashError>;

    /// Read exactly `N` bytes.
    fn read_array<const N: usize>(&self, address: u32) -> Result<[u8; N], FlashError> {
        let mut out = [0u8; N];
        self.read(address, &mut out)?;
        Ok(out)
    }
}

/// Scoped unlock: locks again when dropped, whatever the exit path.
pub struct UnlockGuard<'a, F: Flash> {
    flash: &'a mut F,
}

impl<'a, F: Flash> UnlockGuard<'a, F> {
    /// Unlock `flash` for the guard's lifetime.
    pub fn new(flash: &'a mut F) -> Self {
        flash.unlock();
        Self { flash }
    }
}

impl<F: Flash> std::ops::Deref for UnlockGuard<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.flash
    }
}

impl<F: Flash> std::ops::DerefMut for UnlockGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.flash
    }
}

impl<F: Flash> Drop for UnlockGuard<'_, F> {
    fn drop(&mut self) {
        self.flash.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_guard_relocks() {
        let mut flash = MemFlash::new();
        {
            let mut guard = UnlockGuard::new(&mut flash);
            guard.erase(Allocation::StorageA).unwrap();
            guard.write(layout::start_of(Allocation::StorageA), &[0xAA]).unwrap();
        }
        assert!(matches!(
            flash.write(layout::start_of(Allocation::StorageA), &[0x00]),
            Err(FlashError::Locked)
        ));
    }
}
