//! Engine for attaching to, halting, and dumping core from a Zynq-7000 AMP
//! slave Cortex-A9 core over the ARMv7-A external debug interface.
//!
//! The companion core (running Linux) reaches the slave core's debug
//! registers and the SLCR purely through `/dev/mem`; there is no JTAG probe
//! in this picture; the "probe" is the companion core itself, and every
//! register/memory access on the slave core is mediated by injecting
//! instructions through [`shuttle::Shuttle`] while the slave core sits
//! halted.

pub mod breakwatch;
pub mod coredump;
pub mod error;
pub mod halt;
pub mod memory;
pub mod mmio;
pub mod regcache;
pub mod registers;
pub mod shuttle;
pub mod slcr;

pub use error::{CoreDumpError, EngineError, MmioError, Result};
pub use halt::{Engine, NullResetSequence, PollOutcome, SlaveResetSequence, ZynqAmpReset};
pub use regcache::RegisterCache;
pub use registers::HaltReason;

use std::time::Duration;

use crate::mmio::MmioWindow;

/// Size in bytes of the debug APB register window (4 KiB, word-addressed).
pub const DEBUG_WINDOW_LEN: usize = 0x1000;
/// Size in bytes of the SLCR register window.
pub const SLCR_WINDOW_LEN: usize = 0x1000;

/// One physical-memory span streamed into the core dump as a `PT_LOAD`
/// segment. The default set covers the regions the Piksi AMP image relies
/// on: the OCM/vector block, the flash image, and the vring and ram0
/// shared-memory carveouts the remoteproc driver sets up for the slave core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
}

impl MemoryRegion {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }
}

/// The default `PT_LOAD` regions dumped on crash, in emit order.
pub const DEFAULT_MEMORY_REGIONS: [MemoryRegion; 4] = [
    MemoryRegion::new(0x0000_0000, 0x0001_0000),
    MemoryRegion::new(0x7b00_0000, 0x0200_0000),
    MemoryRegion::new(0x7d00_0000, 0x0080_0000),
    MemoryRegion::new(0x7d80_0000, 0x0280_0000),
];

/// Everything needed to bring up an [`Engine`] against a particular board:
/// where its debug and SLCR windows are mapped, how long to wait for a
/// requested halt, where core dumps land, and which physical regions a dump
/// should capture.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Physical base address of the slave core's 4 KiB debug APB window.
    pub debug_base: u32,
    /// Physical base address of the SLCR window.
    pub slcr_base: u32,
    /// How long `attach`/`wait_halted` wait for the core to halt before
    /// giving up, in milliseconds.
    pub halt_timeout_ms: u64,
    /// Directory core dumps are written into.
    pub core_dump_dir: String,
    /// Physical regions streamed into a core dump's `PT_LOAD` segments.
    pub memory_regions: Vec<MemoryRegion>,
}

impl EngineConfig {
    pub fn halt_timeout(&self) -> Duration {
        Duration::from_millis(self.halt_timeout_ms)
    }
}

impl Default for EngineConfig {
    /// Defaults matching the Zynq-7000 AMP board this engine targets: the
    /// debug and SLCR windows at their documented physical addresses, a 2 s
    /// halt timeout, and the Piksi AMP image's four memory regions.
    fn default() -> Self {
        Self {
            debug_base: 0xf889_0000,
            slcr_base: 0xf800_0000,
            halt_timeout_ms: 2000,
            core_dump_dir: "/tmp/cores".to_string(),
            memory_regions: DEFAULT_MEMORY_REGIONS.to_vec(),
        }
    }
}

/// Map the debug and SLCR windows described by `config` and build an
/// [`Engine`] over them. Does not attach; call [`Engine::attach`] next.
pub fn open_engine(config: &EngineConfig) -> Result<Engine> {
    let dbg = MmioWindow::open(config.debug_base, DEBUG_WINDOW_LEN)?;
    let slcr = MmioWindow::open(config.slcr_base, SLCR_WINDOW_LEN)?;
    Ok(Engine::new(dbg, slcr, config.halt_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_four_memory_regions() {
        let config = EngineConfig::default();
        assert_eq!(config.memory_regions.len(), 4);
        assert_eq!(config.memory_regions[0].base, 0x0000_0000);
        assert_eq!(config.memory_regions[3].size, 0x0280_0000);
    }

    #[test]
    fn halt_timeout_converts_from_millis() {
        let config = EngineConfig {
            halt_timeout_ms: 1500,
            ..EngineConfig::default()
        };
        assert_eq!(config.halt_timeout(), Duration::from_millis(1500));
    }
}
