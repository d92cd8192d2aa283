//! The slave core's general, status, and VFP register state, cached on the
//! companion core between halts so that every register read is a plain
//! struct access and every write is batched into one shuttle round trip at
//! resume time.

use crate::error::EngineError;
use crate::shuttle::{
    build_mov_pc_r0, build_mov_r0_pc, build_mrs_r0_cpsr, build_msr_cpsr_r0, build_vmov_d_r0_r1,
    build_vmov_r0_r1_d, build_vmrs_r0_fpscr, build_vmsr_fpscr_r0, Shuttle,
};

/// CPSR Thumb bit.
const CPSR_THUMB: u32 = 1 << 5;

/// The full GPR/CPSR/FPSCR/VFP state of the slave core, mirroring the
/// layout a GDB `g` packet expects for an ARM core with VFP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterCache {
    /// r0..=r14, then r15 (PC).
    pub r: [u32; 16],
    pub cpsr: u32,
    pub fpscr: u32,
    /// D0..=D15, each the concatenation of two 32-bit core register reads.
    pub d: [u64; 16],
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self {
            r: [0; 16],
            cpsr: 0,
            fpscr: 0,
            d: [0; 16],
        }
    }
}

impl RegisterCache {
    /// Read every register from the halted core into this cache.
    ///
    /// Order matches the original implementation: r0..r14 directly, PC via
    /// r0 (`MCR` is UNPREDICTABLE for Rt = r15), then CPSR, then FPSCR,
    /// then the 16 VFP doubles two core-registers at a time. PC is
    /// adjusted backwards by the fixed Debug-state retire offset (4 for
    /// Thumb, 8 for ARM) so that it reads as the address of the
    /// instruction the core was executing when it halted.
    pub fn read_from(&mut self, shuttle: &mut Shuttle<'_>) -> Result<(), EngineError> {
        for i in 0..15 {
            self.r[i] = shuttle.read_gpreg(i as u8)?;
        }

        shuttle.execute_instruction(build_mov_r0_pc())?;
        self.r[15] = shuttle.read_gpreg(0)?;

        shuttle.execute_instruction(build_mrs_r0_cpsr())?;
        self.cpsr = shuttle.read_gpreg(0)?;

        shuttle.execute_instruction(build_vmrs_r0_fpscr())?;
        self.fpscr = shuttle.read_gpreg(0)?;

        for i in 0..16u8 {
            shuttle.execute_instruction(build_vmov_r0_r1_d(i))?;
            let lo = shuttle.read_gpreg(0)? as u64;
            let hi = shuttle.read_gpreg(1)? as u64;
            self.d[i as usize] = (hi << 32) | lo;
        }

        self.r[15] -= if self.cpsr & CPSR_THUMB != 0 { 4 } else { 8 };

        Ok(())
    }

    /// Write every register in this cache back to the core, in the
    /// original's reverse order: floats first, then FPSCR, then CPSR,
    /// then PC via r0, and only then the remaining GPRs (writing the GPRs
    /// last avoids clobbering r0/r1, which every prior step uses as
    /// scratch).
    pub fn write_to(&self, shuttle: &mut Shuttle<'_>) -> Result<(), EngineError> {
        for i in 0..16u8 {
            let d = self.d[i as usize];
            shuttle.write_gpreg(1, (d >> 32) as u32)?;
            shuttle.write_gpreg(0, d as u32)?;
            shuttle.execute_instruction(build_vmov_d_r0_r1(i))?;
        }

        shuttle.write_gpreg(0, self.fpscr)?;
        shuttle.execute_instruction(build_vmsr_fpscr_r0())?;

        shuttle.write_gpreg(0, self.cpsr)?;
        shuttle.execute_instruction(build_msr_cpsr_r0())?;

        shuttle.write_gpreg(0, self.r[15])?;
        shuttle.execute_instruction(build_mov_pc_r0())?;

        for i in 0..15 {
            shuttle.write_gpreg(i as u8, self.r[i])?;
        }

        Ok(())
    }

    /// The 18-word `ARM_prstatus` register block: r0..=r15, then CPSR, then
    /// an unused orig_r0 slot — matching the order a Linux ARM core dump's
    /// `NT_PRSTATUS` note expects (`elf_gregset_t`: r0..r15, cpsr, orig_r0).
    pub fn prstatus_regs(&self) -> [u32; 18] {
        let mut regs = [0u32; 18];
        regs[..16].copy_from_slice(&self.r);
        regs[16] = self.cpsr;
        regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_is_zeroed() {
        let cache = RegisterCache::default();
        assert_eq!(cache.r, [0; 16]);
        assert_eq!(cache.d, [0; 16]);
    }

    #[test]
    fn prstatus_regs_places_cpsr_at_index_sixteen() {
        let mut cache = RegisterCache::default();
        cache.r[0] = 0x1111_1111;
        cache.cpsr = 0x6000_0010;
        let regs = cache.prstatus_regs();
        assert_eq!(regs[0], 0x1111_1111);
        assert_eq!(regs[16], 0x6000_0010);
        assert_eq!(regs[17], 0);
    }
}
