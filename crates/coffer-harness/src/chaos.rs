//! Power-loss injection for the flash layer.

use coffer_core::{
    flash::{layout::Allocation, FlashError},
    Flash, MemFlash,
};

/// Flash that loses power after a byte budget is spent.
///
/// Every erased or programmed byte consumes budget; the mutation that
/// crosses zero is applied only partially and everything after it fails.
/// Sweeping the budget over a commit explores every interleaving of a
/// crash with the commit protocol.
pub struct CutoffFlash {
    inner: MemFlash,
    budget: Option<u64>,
}

impl CutoffFlash {
    /// Unlimited budget; behaves like plain [`MemFlash`].
    #[must_use]
    pub fn new(inner: MemFlash) -> Self {
        Self { inner, budget: None }
    }

    /// Cut power after `bytes` mutated bytes.
    pub fn cut_after(&mut self, bytes: u64) {
        self.budget = Some(bytes);
    }

    /// Restore power (reads were always allowed; mutations work again).
    pub fn restore_power(&mut self) {
        self.budget = None;
    }

    /// True once the cutoff has triggered.
    #[must_use]
    pub fn died(&self) -> bool {
        self.budget == Some(0)
    }

    /// The underlying flash, for reboot-style reconstruction.
    #[must_use]
    pub fn into_inner(self) -> MemFlash {
        self.inner
    }

    fn spend(&mut self, want: u64) -> u64 {
        match &mut self.budget {
            None => want,
            Some(remaining) => {
                let granted = want.min(*remaining);
                *remaining -= granted;
                granted
            }
        }
    }
}

impl Flash for CutoffFlash {
    fn unlock(&mut self) {
        self.inner.unlock();
    }

    fn lock(&mut self) {
        self.inner.lock();
    }

    fn erase(&mut self, allocation: Allocation) -> Result<(), FlashError> {
        let len = coffer_core::flash::layout::len_of(allocation);
        let granted = self.spend(u64::from(len));
        if granted < u64::from(len) {
            // Erase interrupted: model as not having happened at all for
            // the unreached part; MemFlash has sector granularity, so the
            // conservative model is to fail without erasing.
            return Err(FlashError::ProgramFailed {
                address: coffer_core::flash::layout::start_of(allocation),
            });
        }
        self.inner.erase(allocation)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let granted = self.spend(data.len() as u64) as usize;
        if granted > 0 {
            self.inner.write(address, &data[..granted])?;
        }
        if granted < data.len() {
            return Err(FlashError::ProgramFailed { address: address + granted as u32 });
        }
        Ok(())
    }

    fn read(&self, address: u32, out: &mut [u8]) -> Result<(), FlashError> {
        self.inner.read(address, out)
    }
}
