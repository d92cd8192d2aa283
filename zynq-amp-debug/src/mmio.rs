//! Volatile access to a memory-mapped register window.
//!
//! The slave core's external debug registers and the SLCR are both exposed
//! to the companion core as ordinary physical memory, reachable only by
//! mapping `/dev/mem`. There is no bus abstraction underneath this: every
//! read and write here must be a real load/store to the mapped page, never
//! something the compiler could elide or reorder, since the hardware side
//! effects (DCC handshakes, clock gating, reset pulses) are exactly the
//! point.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

use memmap2::{MmapMut, MmapOptions};

use crate::error::MmioError;

const O_SYNC: i32 = 0o10000;

/// A window into physical memory, mapped once and indexed by byte offset.
pub struct MmioWindow {
    map: MmapMut,
    base: u32,
}

impl MmioWindow {
    /// Map `len` bytes of physical memory starting at `base` via `/dev/mem`.
    pub fn open(base: u32, len: usize) -> Result<Self, MmioError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open("/dev/mem")
            .map_err(|source| MmioError::Map { base, len, source })?;

        let map = unsafe {
            MmapOptions::new()
                .len(len)
                .offset(base as u64)
                .map_mut(&file)
                .map_err(|source| MmioError::Map { base, len, source })?
        };

        Ok(Self { map, base })
    }

    /// Build a window over an already-mapped region (used by tests and by
    /// callers that share one mapping across several windows).
    pub fn from_mmap(map: MmapMut, base: u32) -> Self {
        Self { map, base }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    fn offset_ptr(&self, offset: u32) -> Result<*const u32, MmioError> {
        let offset = offset as usize;
        if offset + 4 > self.map.len() {
            return Err(MmioError::OutOfWindow {
                offset: offset as u32,
                len: self.map.len(),
            });
        }
        Ok(unsafe { self.map.as_ptr().add(offset) } as *const u32)
    }

    /// Read a 32-bit register at `offset` bytes from the window base.
    pub fn read32(&self, offset: u32) -> Result<u32, MmioError> {
        let ptr = self.offset_ptr(offset)?;
        Ok(unsafe { std::ptr::read_volatile(ptr) })
    }

    /// Write a 32-bit register at `offset` bytes from the window base.
    pub fn write32(&mut self, offset: u32, value: u32) -> Result<(), MmioError> {
        let len = self.map.len();
        if offset as usize + 4 > len {
            return Err(MmioError::OutOfWindow {
                offset,
                len,
            });
        }
        let ptr = unsafe { self.map.as_mut_ptr().add(offset as usize) } as *mut u32;
        unsafe { std::ptr::write_volatile(ptr, value) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(len: usize) -> MmioWindow {
        let map = MmapOptions::new().len(len).map_anon().unwrap();
        MmioWindow::from_mmap(map, 0)
    }

    #[test]
    fn read_back_roundtrip() {
        let mut w = window(64);
        w.write32(8, 0xdead_beef).unwrap();
        assert_eq!(w.read32(8).unwrap(), 0xdead_beef);
    }

    #[test]
    fn out_of_window_offset_errors() {
        let w = window(16);
        assert!(matches!(
            w.read32(32),
            Err(MmioError::OutOfWindow { offset: 32, len: 16 })
        ));
    }
}
