//! ARMv7-A external debug register layout.
//!
//! Register numbers and bit layouts come from the ARMv7-A debug
//! architecture and match the offsets the slave core's debug APB
//! decoder uses: each register is a 32-bit word at `NUMBER * 4` bytes
//! from the per-core debug base address.

use std::mem::size_of;

use bitfield::bitfield;

/// A register in the external debug register file.
pub trait DebugRegister {
    /// The register number (word index from the debug base address).
    const NUMBER: u32;
    const NAME: &'static str;

    fn offset() -> u32 {
        Self::NUMBER * size_of::<u32>() as u32
    }
}

bitfield! {
    /// DBGDSCR - Debug Status and Control Register
    #[derive(Copy, Clone)]
    pub struct Dbgdscr(u32);
    impl Debug;

    pub rxfull, _: 30;
    pub txfull, _: 29;
    pub rxfull_l, set_rxfull_l: 27;
    pub txfull_l, set_txfull_l: 26;
    pub pipeadv, _: 25;
    pub instrcompl_l, set_instrcompl_l: 24;
    /// External DCC access mode: 0b00 non-blocking, 0b01 stall, 0b10 fast.
    pub extdccmode, set_extdccmode: 21, 20;
    pub adadiscard, _: 19;
    pub ns, _: 18;
    pub mdbgen, set_mdbgen: 15;
    pub hdbgen, set_hdbgen: 14;
    pub itren, set_itren: 13;
    pub udccdis, set_udccdis: 12;
    pub intdis, set_intdis: 11;
    pub dbgack, set_dbgack: 10;
    pub fs, _: 9;
    pub und_l, _: 8;
    pub adabort_l, set_adabort_l: 7;
    pub sdabort_l, set_sdabort_l: 6;
    /// Method of (debug) Entry.
    pub moe, _: 5, 2;
    pub restarted, _: 1;
    pub halted, set_halted: 0;
}

impl DebugRegister for Dbgdscr {
    const NUMBER: u32 = 34;
    const NAME: &'static str = "DBGDSCR";
}

impl From<u32> for Dbgdscr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgdscr> for u32 {
    fn from(value: Dbgdscr) -> Self {
        value.0
    }
}

/// DCC access mode, `DBGDSCR.ExtDCCmode`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DccMode {
    NonBlocking,
    Stall,
    Fast,
}

impl DccMode {
    pub fn bits(self) -> u32 {
        match self {
            DccMode::NonBlocking => 0b00,
            DccMode::Stall => 0b01,
            DccMode::Fast => 0b10,
        }
    }
}

/// Method of (debug) Entry, decoded from `DBGDSCR.MOE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HaltReason {
    Request,
    Breakpoint,
    Watchpoint,
    External,
    Exception,
    Stepping,
    Unknown,
}

impl Dbgdscr {
    /// Decode `MOE` into a [`HaltReason`]; meaningless unless `halted()`.
    pub fn halt_reason(&self) -> HaltReason {
        match self.moe() {
            0b0000 => HaltReason::Request,
            0b0001 => HaltReason::Breakpoint,
            0b0010 => HaltReason::Watchpoint,
            0b0011 => HaltReason::Breakpoint,
            0b0100 => HaltReason::External,
            0b0101 => HaltReason::Exception,
            0b1000 => HaltReason::Exception,
            0b1010 => HaltReason::Watchpoint,
            0b1011 => HaltReason::Stepping,
            _ => HaltReason::Unknown,
        }
    }
}

bitfield! {
    /// DBGDIDR - Debug ID Register
    #[derive(Copy, Clone)]
    pub struct Dbgdidr(u32);
    impl Debug;

    /// One more than the number of implemented watchpoints.
    pub wrps, _: 31, 28;
    /// One more than the number of implemented breakpoints.
    pub brps, _: 27, 24;
    pub ctx_cmps, _: 23, 20;
    pub version, _: 19, 16;
}

impl DebugRegister for Dbgdidr {
    const NUMBER: u32 = 0;
    const NAME: &'static str = "DBGDIDR";
}

impl From<u32> for Dbgdidr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgdidr> for u32 {
    fn from(value: Dbgdidr) -> Self {
        value.0
    }
}

bitfield! {
    /// DBGDRCR - Debug Run Control Register
    #[derive(Copy, Clone)]
    pub struct Dbgdrcr(u32);
    impl Debug;

    pub cse, set_cse: 2;
    pub rrq, set_rrq: 1;
    pub hrq, set_hrq: 0;
}

impl DebugRegister for Dbgdrcr {
    const NUMBER: u32 = 36;
    const NAME: &'static str = "DBGDRCR";
}

impl From<u32> for Dbgdrcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgdrcr> for u32 {
    fn from(value: Dbgdrcr) -> Self {
        value.0
    }
}

/// DBGITR - Instruction Transfer Register. Plain 32-bit instruction word.
#[derive(Copy, Clone, Debug)]
pub struct Dbgitr(pub u32);

impl DebugRegister for Dbgitr {
    const NUMBER: u32 = 33;
    const NAME: &'static str = "DBGITR";
}

/// DBGDTRRX - DCC data register, external-to-core direction.
#[derive(Copy, Clone, Debug)]
pub struct Dbgdtrrx(pub u32);

impl DebugRegister for Dbgdtrrx {
    const NUMBER: u32 = 32;
    const NAME: &'static str = "DBGDTRRX";
}

/// DBGDTRTX - DCC data register, core-to-external direction.
#[derive(Copy, Clone, Debug)]
pub struct Dbgdtrtx(pub u32);

impl DebugRegister for Dbgdtrtx {
    const NUMBER: u32 = 35;
    const NAME: &'static str = "DBGDTRTX";
}

bitfield! {
    /// DBGBVR<n> - Breakpoint Value Register
    #[derive(Copy, Clone)]
    pub struct Dbgbvr(u32);
    impl Debug;
    pub value, set_value: 31, 0;
}

impl DebugRegister for Dbgbvr {
    const NUMBER: u32 = 64;
    const NAME: &'static str = "DBGBVR";
}

impl From<u32> for Dbgbvr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgbvr> for u32 {
    fn from(value: Dbgbvr) -> Self {
        value.0
    }
}

bitfield! {
    /// DBGBCR<n> - Breakpoint Control Register
    #[derive(Copy, Clone)]
    pub struct Dbgbcr(u32);
    impl Debug;

    pub mask, set_mask: 28, 24;
    pub bt, set_bt: 23, 20;
    pub lbn, set_lbn: 19, 16;
    pub ssc, set_ssc: 15, 14;
    pub hmc, set_hmc: 13;
    /// Byte Address Select.
    pub bas, set_bas: 8, 5;
    pub pmc, set_pmc: 2, 1;
    pub e, set_e: 0;
}

impl DebugRegister for Dbgbcr {
    const NUMBER: u32 = 80;
    const NAME: &'static str = "DBGBCR";
}

impl From<u32> for Dbgbcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgbcr> for u32 {
    fn from(value: Dbgbcr) -> Self {
        value.0
    }
}

bitfield! {
    /// DBGVCR - Vector Catch Register. Only the bits this engine sets are
    /// modeled: trap on reset, undefined instruction, prefetch abort, and
    /// data abort vectors.
    #[derive(Copy, Clone)]
    pub struct Dbgvcr(u32);
    impl Debug;

    pub sd, set_sd: 4;
    pub sp, set_sp: 3;
    pub su, set_su: 1;
    pub r, set_r: 0;
}

impl DebugRegister for Dbgvcr {
    const NUMBER: u32 = 7;
    const NAME: &'static str = "DBGVCR";
}

impl From<u32> for Dbgvcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgvcr> for u32 {
    fn from(value: Dbgvcr) -> Self {
        value.0
    }
}

bitfield! {
    /// DBGWVR<n> - Watchpoint Value Register
    #[derive(Copy, Clone)]
    pub struct Dbgwvr(u32);
    impl Debug;
    pub value, set_value: 31, 0;
}

impl DebugRegister for Dbgwvr {
    const NUMBER: u32 = 96;
    const NAME: &'static str = "DBGWVR";
}

impl From<u32> for Dbgwvr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgwvr> for u32 {
    fn from(value: Dbgwvr) -> Self {
        value.0
    }
}

bitfield! {
    /// DBGWCR<n> - Watchpoint Control Register
    #[derive(Copy, Clone)]
    pub struct Dbgwcr(u32);
    impl Debug;

    pub mask, set_mask: 28, 24;
    pub lsc, set_lsc: 4, 3;
    /// Byte Address Select.
    pub bas, set_bas: 8, 5;
    pub pmc, set_pmc: 2, 1;
    pub e, set_e: 0;
}

impl DebugRegister for Dbgwcr {
    const NUMBER: u32 = 112;
    const NAME: &'static str = "DBGWCR";
}

impl From<u32> for Dbgwcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgwcr> for u32 {
    fn from(value: Dbgwcr) -> Self {
        value.0
    }
}

/// DBGLAR - Lock Access Register. Writing the unlock value disables OS
/// lock protection for the remaining debug registers.
#[derive(Copy, Clone, Debug)]
pub struct Dbglar(pub u32);

impl DebugRegister for Dbglar {
    const NUMBER: u32 = 1004;
    const NAME: &'static str = "DBGLAR";
}

/// Magic value that unlocks the debug register file.
pub const DBGLAR_UNLOCK: u32 = 0xC5AC_CE55;

/// Per-breakpoint/watchpoint register offset helper: `DBGBVR(n)`,
/// `DBGBCR(n)`, `DBGWVR(n)`, `DBGWCR(n)` each occupy one word per slot
/// starting at the base register number.
pub fn slot_offset<R: DebugRegister>(slot: u8) -> u32 {
    R::offset() + (slot as u32) * size_of::<u32>() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_match_apb_map() {
        assert_eq!(Dbgdidr::offset(), 0);
        assert_eq!(Dbgdtrrx::offset(), 128);
        assert_eq!(Dbgitr::offset(), 132);
        assert_eq!(Dbgdscr::offset(), 136);
        assert_eq!(Dbgdtrtx::offset(), 140);
        assert_eq!(Dbgdrcr::offset(), 144);
        assert_eq!(Dbgbvr::offset(), 256);
        assert_eq!(Dbgbcr::offset(), 320);
        assert_eq!(Dbgwvr::offset(), 384);
        assert_eq!(Dbgwcr::offset(), 448);
    }

    #[test]
    fn slot_offsets_increment_by_one_word() {
        assert_eq!(slot_offset::<Dbgbvr>(0), Dbgbvr::offset());
        assert_eq!(slot_offset::<Dbgbvr>(1), Dbgbvr::offset() + 4);
        assert_eq!(slot_offset::<Dbgwcr>(3), Dbgwcr::offset() + 12);
    }

    #[test]
    fn halt_reason_decodes_moe() {
        let mut dscr = Dbgdscr(0);
        dscr.set_halted(true);
        assert_eq!(dscr.halt_reason(), HaltReason::Request);
    }
}
