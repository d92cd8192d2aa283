//! Zynq-7000 SLCR (System Level Control Registers) access needed by the
//! slave-core reset sequence: clock-gate polling before touching the debug
//! interface, and the register unlock/pulse dance that takes the slave
//! core out of reset.
//!
//! Offsets are the public Zynq-7000 TRM (UG585) SLCR register map; this
//! engine only ever reads `A9_CPU_RST_CTRL` to wait out the clock gate.

use crate::error::EngineError;
use crate::mmio::MmioWindow;

/// `SLCR.A9_CPU_RST_CTRL` offset within the SLCR window.
pub const A9_CPU_RST_CTRL: u32 = 0x244;
/// `A9_CPU_RST_CTRL.A9_CLKSTOP1` — core 1's clock is gated while set.
pub const A9_CLKSTOP1: u32 = 1 << 5;

/// Physical address of the watchdog unlock ("kick") register inside the
/// slave core's own address space; this is written through the memory
/// engine (i.e. as the slave core itself would write it), not through the
/// host's SLCR mapping.
pub const WATCHDOG_UNLOCK_ADDR: u32 = 0xf8f0_0634;
pub const WATCHDOG_UNLOCK_KEY_1: u32 = 0x1234_5678;
pub const WATCHDOG_UNLOCK_KEY_2: u32 = 0x8765_4321;

/// Thin wrapper over the SLCR MMIO window.
pub struct Slcr {
    window: MmioWindow,
}

impl Slcr {
    pub fn new(window: MmioWindow) -> Self {
        Self { window }
    }

    /// Block until the slave core's clock is not gated. Touching the debug
    /// interface while the clock is stopped locks up the bus with no
    /// recovery, so every attach and reset begins here; the remoteproc
    /// driver on the companion core is free to gate the clock again right
    /// after this check passes, which is an accepted race given this
    /// engine's single-host, single-core scope.
    pub fn wait_for_clock(&self, poll: impl Fn()) -> Result<(), EngineError> {
        while self.window.read32(A9_CPU_RST_CTRL)? & A9_CLKSTOP1 != 0 {
            poll();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapOptions;
    use std::cell::Cell;

    #[test]
    fn wait_for_clock_returns_immediately_when_not_gated() {
        let map = MmapOptions::new().len(4096).map_anon().unwrap();
        let window = MmioWindow::from_mmap(map, 0);
        let slcr = Slcr::new(window);

        let polls = Cell::new(0);
        slcr.wait_for_clock(|| polls.set(polls.get() + 1)).unwrap();
        assert_eq!(polls.get(), 0);
    }

    #[test]
    fn clkstop1_bit_is_bit_five() {
        assert_eq!(A9_CLKSTOP1, 0b10_0000);
    }
}
