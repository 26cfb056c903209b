//! In-memory flash with NOR bit semantics.

use super::{
    layout::{self, Allocation},
    Flash, FlashError,
};

/// Simulated flash device.
///
/// Erase fills sectors with `0xFF`; programming ANDs bits in, so writing
/// over unerased data degrades exactly like real NOR flash. Bootstrap and
/// bootloader sectors are write-protected, mirroring the option bytes set
/// at provisioning.
pub struct MemFlash {
    bytes: Vec<u8>,
    locked: bool,
}

impl Default for MemFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFlash {
    /// Fresh, fully erased flash.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: vec![0xFF; layout::FLASH_TOTAL_LEN as usize], locked: true }
    }

    /// Borrow the raw contents, for snapshotting in tests.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, FlashError> {
        let start = address
            .checked_sub(layout::FLASH_ORIGIN)
            .ok_or(FlashError::OutOfRange { address, len })? as usize;
        let end = start.checked_add(len).ok_or(FlashError::OutOfRange { address, len })?;
        if end > self.bytes.len() {
            return Err(FlashError::OutOfRange { address, len });
        }
        Ok(start)
    }

    fn assert_writable(&self, address: u32, len: usize) -> Result<(), FlashError> {
        for sector in layout::SECTOR_MAP {
            let overlaps = address < sector.start + sector.len && address + len as u32 > sector.start;
            if overlaps
                && matches!(sector.allocation, Allocation::Bootstrap | Allocation::Bootloader)
            {
                return Err(FlashError::Protected { address });
            }
        }
        Ok(())
    }
}

impl Flash for MemFlash {
    fn unlock(&mut self) {
        self.locked = false;
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn erase(&mut self, allocation: Allocation) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        for sector in layout::sectors_of(allocation) {
            self.assert_writable(sector.start, sector.len as usize)?;
            let start = self.offset(sector.start, sector.len as usize)?;
            self.bytes[start..start + sector.len as usize].fill(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        // Range check first; the protection check below does unchecked
        // address arithmetic.
        let start = self.offset(address, data.len())?;
        self.assert_writable(address, data.len())?;
        for (slot, byte) in self.bytes[start..start + data.len()].iter_mut().zip(data) {
            *slot &= byte;
        }
        Ok(())
    }

    fn read(&self, address: u32, out: &mut [u8]) -> Result<(), FlashError> {
        let start = self.offset(address, out.len())?;
        out.copy_from_slice(&self.bytes[start..start + out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_then_write_then_read() {
        let mut flash = MemFlash::new();
        flash.unlock();
        flash.erase(Allocation::StorageB).unwrap();
        let base = layout::start_of(Allocation::StorageB);
        flash.write(base, b"stor").unwrap();
        flash.lock();
        assert_eq!(&flash.read_array::<4>(base).unwrap(), b"stor");
    }

    #[test]
    fn programming_only_clears_bits() {
        let mut flash = MemFlash::new();
        flash.unlock();
        flash.erase(Allocation::StorageA).unwrap();
        let base = layout::start_of(Allocation::StorageA);
        flash.write(base, &[0x0F]).unwrap();
        flash.write(base, &[0xF0]).unwrap();
        assert_eq!(flash.read_array::<1>(base).unwrap(), [0x00]);
    }

    #[test]
    fn bootloader_is_protected() {
        let mut flash = MemFlash::new();
        flash.unlock();
        assert!(matches!(
            flash.erase(Allocation::Bootloader),
            Err(FlashError::Protected { .. })
        ));
        assert!(matches!(
            flash.write(layout::start_of(Allocation::Bootloader), &[0]),
            Err(FlashError::Protected { .. })
        ));
    }

    #[test]
    fn locked_flash_rejects_writes() {
        let mut flash = MemFlash::new();
        assert!(matches!(
            flash.write(layout::start_of(Allocation::StorageA), &[0]),
            Err(FlashError::Locked)
        ));
    }

    #[test]
    fn out_of_range_rejected() {
        let flash = MemFlash::new();
        let mut buf = [0u8; 8];
        assert!(flash.read(layout::FLASH_END - 4, &mut buf).is_err());
        assert!(flash.read(0, &mut buf).is_err());
    }
}
