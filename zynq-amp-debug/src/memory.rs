//! Virtual-address memory access to the slave core via the DCC, VA→PA
//! translation, and I-side/D-side cache maintenance.
//!
//! All reads and writes here clobber r0 (and r13 for the byte-at-a-time
//! path) on the slave core; callers that need the register cache intact
//! across a memory access must save and restore it themselves. The halt
//! state machine does this by always reading the register cache back
//! fresh after resuming, never by accessing memory mid-register-read.

use crate::error::EngineError;
use crate::registers::{DccMode, Dbgdrcr, DebugRegister};
use crate::shuttle::{
    build_ldc_fast_word, build_mcr_ats1cpr, build_mcr_dccmvac, build_mrc_par, build_stc_fast_word,
    build_strb_r0_sp, Shuttle,
};

/// Cortex-A9 D-cache line length in bytes.
const CACHE_LINE_LENGTH: u32 = 8 * 4;

/// Stateful memory engine: wraps a [`Shuttle`] and tracks the sticky MMU
/// fault flag the original target's `check_error` hook reports and clears.
pub struct MemoryEngine {
    mmu_fault: bool,
    /// The faulting VA/PAR of the most recent `va_to_pa` translation fault,
    /// kept separately from `mmu_fault` so a caller that wants the typed
    /// `EngineError::MmuFault` (rather than just the sticky poll flag) can
    /// retrieve it via `take_translation_fault`.
    last_translation_fault: Option<(u32, u32)>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self {
            mmu_fault: false,
            last_translation_fault: None,
        }
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a virtual address to its current physical mapping via
    /// `ATS1CPR`/`PAR`. Sets the sticky fault flag (surfaced by
    /// `take_error`) if the translation faulted, but still returns the
    /// best-effort physical address so breakpoint callers can decide what
    /// to do with it.
    pub fn va_to_pa(&mut self, shuttle: &mut Shuttle<'_>, va: u32) -> Result<u32, EngineError> {
        shuttle.write_gpreg(0, va)?;
        shuttle.execute_instruction(build_mcr_ats1cpr())?;
        shuttle.execute_instruction(build_mrc_par())?;
        let par = shuttle.read_gpreg(0)?;

        if par & 1 != 0 {
            self.mmu_fault = true;
            self.last_translation_fault = Some((va, par));
            let fault = EngineError::MmuFault { va, par };
            tracing::warn!(%fault, "MMU translation fault");
        }

        Ok((par & !0xfff) | (va & 0xfff))
    }

    /// Take and clear the most recent translation fault as a typed
    /// `EngineError::MmuFault`, for a caller that wants to propagate it
    /// rather than just poll the sticky flag via `take_error`.
    pub fn take_translation_fault(&mut self) -> Option<EngineError> {
        self.last_translation_fault
            .take()
            .map(|(va, par)| EngineError::MmuFault { va, par })
    }

    /// Clean every D-cache line covering `[va, va+len)` by MVA so that
    /// subsequent physical-memory reads (e.g. for a core dump) observe
    /// what the core last wrote.
    pub fn cache_clean(&mut self, shuttle: &mut Shuttle<'_>, va: u32, len: u32) -> Result<(), EngineError> {
        let mut cl = va & !(CACHE_LINE_LENGTH - 1);
        while cl < va + len {
            shuttle.write_gpreg(0, cl)?;
            shuttle.execute_instruction(build_mcr_dccmvac())?;
            cl += CACHE_LINE_LENGTH;
        }
        Ok(())
    }

    fn check_sticky_abort(&mut self, shuttle: &mut Shuttle<'_>) -> Result<bool, EngineError> {
        let dscr = shuttle.read_dscr()?;
        if dscr.sdabort_l() {
            let mut drcr = Dbgdrcr::from(0);
            drcr.set_cse(true);
            shuttle.dbg.write32(Dbgdrcr::offset(), drcr.into())?;
            self.mmu_fault = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Read `len` bytes from virtual address `src` using fast-mode DCC
    /// transfer. Unaligned reads are handled by reading whole words that
    /// cover the span and slicing out the requested bytes, exactly as the
    /// original `cortexa_slow_mem_read` does.
    pub fn read(&mut self, shuttle: &mut Shuttle<'_>, src: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let misalign = (src & 3) as usize;
        let words = (len + misalign + 3) / 4;
        let mut dest32 = vec![0u32; words];

        shuttle.write_gpreg(0, src & !3)?;

        shuttle.set_dcc_mode(DccMode::Fast)?;
        shuttle.execute_instruction(build_ldc_fast_word())?;

        // The ARMv7-A ARM says the first fast-mode DBGDTRTX read blocks
        // until the instruction completes, but in practice it returns
        // junk; it is read here and discarded to match observed hardware
        // behavior.
        shuttle.read_dtrtx_raw()?;

        for word in dest32.iter_mut() {
            *word = shuttle.read_dtrtx_raw()?;
        }

        shuttle.set_dcc_mode(DccMode::Stall)?;

        let mut out = vec![0u8; len];
        if self.check_sticky_abort(shuttle)? {
            return Ok(out);
        }
        shuttle.read_dtrtx_raw()?;

        let bytes: &[u8] = words_as_bytes(&dest32);
        out.copy_from_slice(&bytes[misalign..misalign + len]);
        Ok(out)
    }

    /// Write `src` to virtual address `dest`. Falls back to a byte-at-a-time
    /// `strb` loop for unaligned destinations or lengths, matching the
    /// original's split between `cortexa_slow_mem_write` and
    /// `cortexa_slow_mem_write_bytes`.
    pub fn write(&mut self, shuttle: &mut Shuttle<'_>, dest: u32, src: &[u8]) -> Result<(), EngineError> {
        if src.is_empty() {
            return Ok(());
        }

        if dest & 3 != 0 || src.len() & 3 != 0 {
            return self.write_bytes(shuttle, dest, src);
        }

        shuttle.write_gpreg(0, dest)?;

        shuttle.set_dcc_mode(DccMode::Fast)?;
        shuttle.execute_instruction(build_stc_fast_word())?;

        for chunk in src.chunks_exact(4) {
            let word = u32::from_ne_bytes(chunk.try_into().unwrap());
            shuttle.write_dtrrx_raw(word)?;
        }

        shuttle.set_dcc_mode(DccMode::Stall)?;
        self.check_sticky_abort(shuttle)?;
        Ok(())
    }

    fn write_bytes(&mut self, shuttle: &mut Shuttle<'_>, dest: u32, src: &[u8]) -> Result<(), EngineError> {
        shuttle.write_gpreg(13, dest)?;

        for &byte in src {
            shuttle.write_gpreg(0, byte as u32)?;
            shuttle.execute_instruction(build_strb_r0_sp())?;
            if self.check_sticky_abort(shuttle)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Take and clear the sticky MMU-fault flag, mirroring
    /// `cortexa_check_error`.
    pub fn take_error(&mut self) -> bool {
        std::mem::replace(&mut self.mmu_fault, false)
    }
}

fn words_as_bytes(words: &[u32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, words.len() * 4) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_clean_covers_partial_trailing_line() {
        let mut lines = Vec::new();
        let va = 0x1000u32;
        let len = 40u32; // just over one cache line
        let mut cl = va & !(CACHE_LINE_LENGTH - 1);
        while cl < va + len {
            lines.push(cl);
            cl += CACHE_LINE_LENGTH;
        }
        assert_eq!(lines, vec![0x1000, 0x1020]);
    }

    #[test]
    fn words_as_bytes_preserves_native_byte_order() {
        let words = [0x0403_0201u32];
        let bytes = words_as_bytes(&words);
        assert_eq!(bytes.len(), 4);
        assert_eq!(u32::from_ne_bytes(bytes.try_into().unwrap()), words[0]);
    }

    #[test]
    fn va_to_pa_latches_translation_fault_with_va_and_par() {
        use crate::mmio::MmioWindow;
        use crate::registers::{Dbgdscr, Dbgdtrtx};

        let map = memmap2::MmapOptions::new()
            .len(crate::DEBUG_WINDOW_LEN)
            .map_anon()
            .unwrap();
        let mut dbg = MmioWindow::from_mmap(map, 0);

        let mut dscr = Dbgdscr::from(0);
        dscr.set_instrcompl_l(true);
        dbg.write32(Dbgdscr::offset(), dscr.into()).unwrap();

        // PAR.F (bit 0) set: translation faulted.
        let par = 0x1234_5001u32;
        dbg.write32(Dbgdtrtx::offset(), par).unwrap();

        let mut shuttle = Shuttle::new(&mut dbg);
        let mut memory = MemoryEngine::new();
        let va = 0x2000_0004u32;

        memory.va_to_pa(&mut shuttle, va).unwrap();
        assert!(memory.mmu_fault);

        match memory.take_translation_fault() {
            Some(EngineError::MmuFault { va: fault_va, par: fault_par }) => {
                assert_eq!(fault_va, va);
                assert_eq!(fault_par, par);
            }
            other => panic!("expected MmuFault, got {other:?}"),
        }
        assert!(memory.take_translation_fault().is_none());
    }
}
