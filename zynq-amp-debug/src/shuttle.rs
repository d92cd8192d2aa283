//! Instruction injection over DBGITR and scalar transfer over the DCC.
//!
//! The slave core has no conventional memory-access debug port: every
//! register or memory operation is performed by halting the core, writing
//! an ARM instruction word into `DBGITR`, and letting the core execute it
//! in debug state. Scalar values move in and out through the DCC data
//! registers (`DBGDTRRX`/`DBGDTRTX`), which the executed instruction reads
//! or writes via the CP14 interface. This module is the shuttle that drives
//! that dance; everything above it (register cache, memory engine) is built
//! out of `execute_instruction` and the `read_gpreg`/`write_gpreg` pair.

use crate::error::EngineError;
use crate::mmio::MmioWindow;
use crate::registers::{DebugRegister, Dbgdrcr, Dbgdscr, Dbgdtrrx, Dbgdtrtx, Dbgitr, DccMode};

/// Drives the DBGITR/DCC shuttle against a debug register window.
pub struct Shuttle<'a> {
    pub(crate) dbg: &'a mut MmioWindow,
}

impl<'a> Shuttle<'a> {
    pub fn new(dbg: &'a mut MmioWindow) -> Self {
        Self { dbg }
    }

    pub fn read_dscr(&self) -> Result<Dbgdscr, EngineError> {
        Ok(Dbgdscr::from(self.dbg.read32(Dbgdscr::offset())?))
    }

    pub fn write_dscr(&mut self, dscr: Dbgdscr) -> Result<(), EngineError> {
        self.dbg.write32(Dbgdscr::offset(), dscr.into())?;
        Ok(())
    }

    pub fn set_dcc_mode(&mut self, mode: DccMode) -> Result<Dbgdscr, EngineError> {
        let mut dscr = self.read_dscr()?;
        dscr.set_extdccmode(mode.bits());
        self.write_dscr(dscr)?;
        Ok(dscr)
    }

    /// Write an instruction word to `DBGITR` and wait for the core to
    /// finish executing it, clearing a sticky data abort into an error if
    /// one was raised.
    pub fn execute_instruction(&mut self, instruction: u32) -> Result<Dbgdscr, EngineError> {
        self.dbg.write32(Dbgitr::offset(), instruction)?;

        let mut dscr = self.read_dscr()?;
        while !dscr.instrcompl_l() {
            dscr = self.read_dscr()?;
        }

        if dscr.adabort_l() || dscr.sdabort_l() {
            let mut drcr = Dbgdrcr::from(0);
            drcr.set_cse(true);
            self.dbg.write32(Dbgdrcr::offset(), drcr.into())?;
            return Err(EngineError::StickyAbort { dscr: dscr.into() });
        }

        Ok(dscr)
    }

    /// Read the raw DCC-to-host register without waiting; callers that
    /// need the fast-mode "discard the first read" erratum use this
    /// directly instead of going through `read_gpreg`.
    pub fn read_dtrtx_raw(&self) -> Result<u32, EngineError> {
        Ok(self.dbg.read32(Dbgdtrtx::offset())?)
    }

    pub fn write_dtrrx_raw(&mut self, value: u32) -> Result<(), EngineError> {
        self.dbg.write32(Dbgdtrrx::offset(), value)?;
        Ok(())
    }

    /// Read a general-purpose register by injecting an `MCR` that sends it
    /// to the host through the DCC. Rejects r15: `MRC`/`MCR` with Rt = r15
    /// is UNPREDICTABLE, so PC only ever moves through this shuttle via r0
    /// (see `regcache.rs`).
    pub fn read_gpreg(&mut self, regno: u8) -> Result<u32, EngineError> {
        if regno > 14 {
            return Err(EngineError::InvalidRegister(regno));
        }
        let instruction = build_mcr(14, 0, regno as u16, 0, 5, 0);
        self.execute_instruction(instruction)?;
        self.read_dtrtx_raw()
    }

    /// Write a general-purpose register by pushing a value through the DCC
    /// and injecting an `MRC` that loads it. Rejects r15 for the same
    /// reason as `read_gpreg`.
    pub fn write_gpreg(&mut self, regno: u8, value: u32) -> Result<(), EngineError> {
        if regno > 14 {
            return Err(EngineError::InvalidRegister(regno));
        }
        self.write_dtrrx_raw(value)?;
        let instruction = build_mrc(14, 0, regno as u16, 0, 5, 0);
        self.execute_instruction(instruction)?;
        Ok(())
    }
}

/// Build an `MCR p14, 0, Rt, c0, c5, 0` instruction (core register -> DCC).
pub fn build_mcr(coproc: u8, opcode1: u8, reg: u16, ctrl_reg_n: u8, ctrl_reg_m: u8, opcode2: u8) -> u32 {
    let mut ret: u32 = 0b1110_1110_0000_0000_0000_0000_0001_0000;
    ret |= (coproc as u32) << 8;
    ret |= (opcode1 as u32) << 21;
    ret |= (reg as u32) << 12;
    ret |= (ctrl_reg_n as u32) << 16;
    ret |= ctrl_reg_m as u32;
    ret |= (opcode2 as u32) << 5;
    ret
}

/// Build an `MRC p14, 0, Rt, c0, c5, 0` instruction (DCC -> core register).
pub fn build_mrc(coproc: u8, opcode1: u8, reg: u16, ctrl_reg_n: u8, ctrl_reg_m: u8, opcode2: u8) -> u32 {
    let mut ret: u32 = 0b1110_1110_0001_0000_0000_0000_0001_0000;
    ret |= (coproc as u32) << 8;
    ret |= (opcode1 as u32) << 21;
    ret |= (reg as u32) << 12;
    ret |= (ctrl_reg_n as u32) << 16;
    ret |= ctrl_reg_m as u32;
    ret |= (opcode2 as u32) << 5;
    ret
}

/// `mov r0, pc` — the only way to read PC without an UNPREDICTABLE MCR.
pub fn build_mov_r0_pc() -> u32 {
    0xe1a0000f
}

/// `mov pc, r0` — write back PC via r0.
pub fn build_mov_pc_r0() -> u32 {
    0xe1a0f000
}

/// `mrs r0, CPSR`.
pub fn build_mrs_r0_cpsr() -> u32 {
    0xe10f0000
}

/// `msr CPSR_fsxc, r0`.
pub fn build_msr_cpsr_r0() -> u32 {
    0xe12ff000
}

/// `vmrs r0, fpscr`.
pub fn build_vmrs_r0_fpscr() -> u32 {
    0xeef10a10
}

/// `vmsr fpscr, r0`.
pub fn build_vmsr_fpscr_r0() -> u32 {
    0xeee10a10
}

/// `vmov r0, r1, d<i>` — read a VFP double into r0/r1.
pub fn build_vmov_r0_r1_d(i: u8) -> u32 {
    0xec510b10 | i as u32
}

/// `vmov d<i>, r0, r1` — write r0/r1 into a VFP double.
pub fn build_vmov_d_r0_r1(i: u8) -> u32 {
    0xec410b10 | i as u32
}

/// `ldc p14, c5, [r0], #4` in fast DCC mode: reads one word from memory at
/// `[r0]` into the DCC, post-incrementing r0.
pub fn build_ldc_fast_word() -> u32 {
    0xecb0_5e01
}

/// `stc p14, c5, [r0], #4` in fast DCC mode: writes one word from the DCC
/// to memory at `[r0]`, post-incrementing r0.
pub fn build_stc_fast_word() -> u32 {
    0xeca0_5e01
}

/// `strb r0, [sp], #1`.
pub fn build_strb_r0_sp() -> u32 {
    0xe4cd_0001
}

/// `MCR p15, 0, r0, c7, c8, 0` — ATS1CPR (translate VA, privileged read).
pub fn build_mcr_ats1cpr() -> u32 {
    build_mcr(15, 0, 0, 7, 8, 0)
}

/// `MRC p15, 0, r0, c7, c4, 0` — read PAR.
pub fn build_mrc_par() -> u32 {
    build_mrc(15, 0, 0, 7, 4, 0)
}

/// `MCR p15, 0, r0, c7, c10, 1` — DCCMVAC (clean data cache line by MVA).
pub fn build_mcr_dccmvac() -> u32 {
    build_mcr(15, 0, 0, 7, 10, 1)
}

/// `MCR p15, 0, r0, c7, c5, 0` — ICIALLU (invalidate instruction cache).
pub fn build_mcr_iciallu() -> u32 {
    build_mcr(15, 0, 0, 7, 5, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcr_and_mrc_differ_only_in_load_bit() {
        let mcr = build_mcr(14, 0, 3, 0, 5, 0);
        let mrc = build_mrc(14, 0, 3, 0, 5, 0);
        assert_eq!(mcr ^ mrc, 1 << 20);
    }

    #[test]
    fn mov_r0_pc_matches_original_encoding() {
        assert_eq!(build_mov_r0_pc(), 0xe1a0000f);
    }

    #[test]
    fn fast_dcc_transfer_instructions_match_original_encoding() {
        assert_eq!(build_ldc_fast_word(), 0xecb05e01);
        assert_eq!(build_stc_fast_word(), 0xeca05e01);
        assert_eq!(build_strb_r0_sp(), 0xe4cd0001);
    }

    #[test]
    fn gpreg_shuttle_rejects_r15() {
        let map = memmap2::MmapOptions::new()
            .len(crate::DEBUG_WINDOW_LEN)
            .map_anon()
            .unwrap();
        let mut dbg = MmioWindow::from_mmap(map, 0);
        let mut shuttle = Shuttle::new(&mut dbg);

        assert!(matches!(
            shuttle.read_gpreg(15),
            Err(EngineError::InvalidRegister(15))
        ));
        assert!(matches!(
            shuttle.write_gpreg(15, 0),
            Err(EngineError::InvalidRegister(15))
        ));
    }
}
