//! ELF32 core dump assembly: ehdr/phdr layout, note section assembly, and
//! segment streaming for a crashed Zynq-7000 AMP slave core.
//!
//! The layout invariants below are load-bearing, not stylistic: a core file
//! a standard ELF reader can parse needs `e_phoff == e_ehsize`, contiguous
//! `p_offset`s starting right after the program header array, and the
//! `PT_NOTE` segment last. Note name and description fields are padded to a
//! 4-byte boundary independently of each other, not as a combined unit.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use scroll::{Pwrite, LE};
use time::OffsetDateTime;

use crate::error::{CoreDumpError, EngineError, Result};
use crate::regcache::RegisterCache;
use crate::MemoryRegion;

/// Size in bytes of an ELF32 file header.
pub const ELF32_EHDR_SIZE: usize = 52;
/// Size in bytes of one ELF32 program header.
pub const ELF32_PHDR_SIZE: usize = 32;

const EM_ARM: u16 = 0x28;
const ET_CORE: u16 = 4;
const EV_CURRENT: u32 = 1;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;

const NT_PRSTATUS: u32 = 1;
const NT_AUXV: u32 = 6;
const NT_ARM_VFP: u32 = 0x400;

const AT_HWCAP: u32 = 16;
const HWCAP_VFP: u32 = 1 << 6;
const HWCAP_NEON: u32 = 1 << 12;

/// Signal number reported in `NT_PRSTATUS.pr_cursig` for an ordinary crash
/// dump. `dump_core`'s caller may pass a different value (e.g. when the
/// watchdog already knows which vector trapped); this is only the default a
/// `monitor gcore` invocation with no further information falls back to.
pub const DEFAULT_CRASH_SIGNAL: u32 = 11; // SIGSEGV

fn scroll_err(e: scroll::Error) -> EngineError {
    EngineError::Other(anyhow::anyhow!(e))
}

fn build_ehdr(phnum: u16) -> Result<[u8; ELF32_EHDR_SIZE]> {
    let mut buf = [0u8; ELF32_EHDR_SIZE];
    buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    buf[4] = 1; // ELFCLASS32
    buf[5] = 1; // ELFDATA2LSB
    buf[6] = 1; // EI_VERSION == EV_CURRENT
                // buf[7..16]: EI_OSABI, EI_ABIVERSION, EI_PAD all zero.

    buf.pwrite_with(ET_CORE, 16, LE).map_err(scroll_err)?;
    buf.pwrite_with(EM_ARM, 18, LE).map_err(scroll_err)?;
    buf.pwrite_with(EV_CURRENT, 20, LE).map_err(scroll_err)?;
    buf.pwrite_with(0u32, 24, LE).map_err(scroll_err)?; // e_entry
    buf.pwrite_with(ELF32_EHDR_SIZE as u32, 28, LE)
        .map_err(scroll_err)?; // e_phoff == e_ehsize
    buf.pwrite_with(0u32, 32, LE).map_err(scroll_err)?; // e_shoff
    buf.pwrite_with(0u32, 36, LE).map_err(scroll_err)?; // e_flags
    buf.pwrite_with(ELF32_EHDR_SIZE as u16, 40, LE)
        .map_err(scroll_err)?; // e_ehsize
    buf.pwrite_with(ELF32_PHDR_SIZE as u16, 42, LE)
        .map_err(scroll_err)?; // e_phentsize
    buf.pwrite_with(phnum, 44, LE).map_err(scroll_err)?;
    buf.pwrite_with(0u16, 46, LE).map_err(scroll_err)?; // e_shentsize
    buf.pwrite_with(0u16, 48, LE).map_err(scroll_err)?; // e_shnum
    buf.pwrite_with(0u16, 50, LE).map_err(scroll_err)?; // e_shstrndx

    Ok(buf)
}

fn build_phdr(p_type: u32, p_offset: u32, p_vaddr: u32, p_filesz: u32) -> Result<[u8; ELF32_PHDR_SIZE]> {
    let mut buf = [0u8; ELF32_PHDR_SIZE];
    buf.pwrite_with(p_type, 0, LE).map_err(scroll_err)?;
    buf.pwrite_with(p_offset, 4, LE).map_err(scroll_err)?;
    buf.pwrite_with(p_vaddr, 8, LE).map_err(scroll_err)?; // p_vaddr
    buf.pwrite_with(p_vaddr, 12, LE).map_err(scroll_err)?; // p_paddr, same as vaddr
    buf.pwrite_with(p_filesz, 16, LE).map_err(scroll_err)?; // p_filesz
    buf.pwrite_with(p_filesz, 20, LE).map_err(scroll_err)?; // p_memsz == p_filesz
    buf.pwrite_with(0u32, 24, LE).map_err(scroll_err)?; // p_flags
    buf.pwrite_with(0u32, 28, LE).map_err(scroll_err)?; // p_align
    Ok(buf)
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Append one note: header, name padded to 4 bytes, desc padded to 4 bytes.
/// The two paddings are independent, per the original's note-writing
/// behavior — a combined-length pad would misalign every note after the
/// first whose name or desc length isn't itself a multiple of 4.
fn push_note(buf: &mut Vec<u8>, name: &str, note_type: u32, desc: &[u8]) -> Result<()> {
    let namesz = name.len() + 1;
    if namesz > u32::MAX as usize || desc.len() > u32::MAX as usize {
        return Err(CoreDumpError::NameTooLong.into());
    }

    buf.extend_from_slice(&(namesz as u32).to_le_bytes());
    buf.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    buf.extend_from_slice(&note_type.to_le_bytes());

    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf.resize(buf.len() + (align4(namesz) - namesz), 0);

    buf.extend_from_slice(desc);
    buf.resize(buf.len() + (align4(desc.len()) - desc.len()), 0);

    Ok(())
}

/// Build the `NT_PRSTATUS` note descriptor: the signal that caused the halt
/// followed by the 18-word GPR/CPSR image, matching the slim custom
/// `ARM_prstatus` the original target writes rather than glibc's full
/// `struct elf_prstatus` (that struct carries process/signal bookkeeping
/// this engine has no use for and never populated correctly).
fn prstatus_desc(regs: &RegisterCache, signal: u32) -> Vec<u8> {
    let mut desc = Vec::with_capacity(4 + 18 * 4);
    desc.extend_from_slice(&signal.to_le_bytes());
    for word in regs.prstatus_regs() {
        desc.extend_from_slice(&word.to_le_bytes());
    }
    desc
}

/// Build the `NT_AUXV` note descriptor: a single `AT_HWCAP` entry
/// advertising VFP and NEON support.
fn auxv_desc() -> Vec<u8> {
    let mut desc = Vec::with_capacity(8);
    desc.extend_from_slice(&AT_HWCAP.to_le_bytes());
    desc.extend_from_slice(&(HWCAP_VFP | HWCAP_NEON).to_le_bytes());
    desc
}

/// Build the `NT_ARM_VFP` note descriptor: the kernel's `struct user_vfp`
/// layout (32 VFP double registers, then FPSCR). Only 16 doubles were
/// actually captured from the halted core — d16..d31 don't exist on a
/// Cortex-A9 — so the upper half is zero-extended, matching the spec's
/// documented (if slightly lossy) choice over leaving the note truncated.
fn arm_vfp_desc(regs: &RegisterCache) -> Vec<u8> {
    let mut desc = Vec::with_capacity(32 * 8 + 4);
    for i in 0..32usize {
        let d = if i < 16 { regs.d[i] } else { 0 };
        desc.extend_from_slice(&d.to_le_bytes());
    }
    desc.extend_from_slice(&regs.fpscr.to_le_bytes());
    desc
}

/// Assemble the note blob for a core dump: `PRSTATUS`, `AUXV`, then
/// `ARM_VFP`, in that fixed order.
pub fn assemble_notes(regs: &RegisterCache, signal: u32) -> Result<Vec<u8>> {
    let mut notes = Vec::new();
    push_note(&mut notes, "CORE", NT_PRSTATUS, &prstatus_desc(regs, signal))?;
    push_note(&mut notes, "CORE", NT_AUXV, &auxv_desc())?;
    push_note(&mut notes, "LINUX", NT_ARM_VFP, &arm_vfp_desc(regs))?;
    Ok(notes)
}

/// Default core dump filename: `<dir>/zynq_amp_core-YYYYMMDD-HHMMSS`, UTC.
pub fn core_dump_path(dir: &str, now: OffsetDateTime) -> Result<PathBuf> {
    let format = time::macros::format_description!("[year][month][day]-[hour][minute][second]");
    let stamp = now.format(&format).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    Ok(Path::new(dir).join(format!("zynq_amp_core-{stamp}")))
}

/// Write a complete ELF32 core file to `path`.
///
/// `segment_source` supplies the raw bytes for each `PT_LOAD` region (the
/// caller is expected to have already cache-cleaned the live core's view of
/// that range before calling this, since this function only touches
/// `/dev/mem` indirectly through the closure); this keeps the byte-layout
/// logic here testable without a real debug target or a real `/dev/mem`.
pub fn write_core_file<F>(
    path: &Path,
    regions: &[MemoryRegion],
    regs: &RegisterCache,
    signal: u32,
    mut segment_source: F,
) -> Result<()>
where
    F: FnMut(MemoryRegion) -> std::io::Result<Vec<u8>>,
{
    let notes = assemble_notes(regs, signal)?;

    let phnum = regions.len() + 1;
    let ehdr = build_ehdr(phnum as u16)?;

    let mut cursor = ELF32_EHDR_SIZE as u32 + (phnum as u32) * ELF32_PHDR_SIZE as u32;
    let mut phdrs = Vec::with_capacity(phnum * ELF32_PHDR_SIZE);
    for region in regions {
        phdrs.extend_from_slice(&build_phdr(PT_LOAD, cursor, region.base, region.size)?);
        cursor += region.size;
    }
    phdrs.extend_from_slice(&build_phdr(PT_NOTE, cursor, 0, notes.len() as u32)?);

    let mut file = File::create(path).map_err(|source| CoreDumpError::Create {
        path: path.display().to_string(),
        source,
    })?;

    file.write_all(&ehdr).map_err(CoreDumpError::Write)?;
    file.write_all(&phdrs).map_err(CoreDumpError::Write)?;

    for region in regions {
        let bytes = segment_source(*region).map_err(CoreDumpError::Write)?;
        file.write_all(&bytes).map_err(CoreDumpError::Write)?;
    }

    file.write_all(&notes).map_err(CoreDumpError::Write)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_regs() -> RegisterCache {
        let mut regs = RegisterCache::default();
        regs.r[0] = 0xdead_beef;
        regs.cpsr = 0x6000_0010;
        regs.fpscr = 0x1234_5678;
        regs.d[0] = 0x1122_3344_5566_7788;
        regs
    }

    #[test]
    fn ehdr_phoff_equals_ehsize() {
        let ehdr = build_ehdr(4).unwrap();
        let phoff = u32::from_le_bytes(ehdr[28..32].try_into().unwrap());
        assert_eq!(phoff, ELF32_EHDR_SIZE as u32);
        assert_eq!(&ehdr[0..4], &[0x7f, b'E', b'L', b'F']);
        assert_eq!(u16::from_le_bytes(ehdr[18..20].try_into().unwrap()), EM_ARM);
    }

    #[test]
    fn note_padding_is_independent_per_field() {
        let mut buf = Vec::new();
        push_note(&mut buf, "CORE", NT_PRSTATUS, &[1, 2, 3, 4, 5]).unwrap();
        // header(12) + "CORE\0" padded to 8 + desc(5) padded to 8
        assert_eq!(buf.len(), 12 + 8 + 8);
        assert_eq!(&buf[12..17], b"CORE\0");
        assert_eq!(&buf[17..20], &[0, 0, 0]);
        assert_eq!(&buf[20..25], &[1, 2, 3, 4, 5]);
        assert_eq!(&buf[25..28], &[0, 0, 0]);
    }

    #[test]
    fn assembled_notes_are_prstatus_then_auxv_then_arm_vfp() {
        let notes = assemble_notes(&sample_regs(), DEFAULT_CRASH_SIGNAL).unwrap();

        let prstatus_type = u32::from_le_bytes(notes[8..12].try_into().unwrap());
        assert_eq!(prstatus_type, NT_PRSTATUS);

        let prstatus_descsz = u32::from_le_bytes(notes[4..8].try_into().unwrap()) as usize;
        let after_prstatus = 12 + 8 + align4(prstatus_descsz);

        let auxv_type = u32::from_le_bytes(notes[after_prstatus + 8..after_prstatus + 12].try_into().unwrap());
        assert_eq!(auxv_type, NT_AUXV);
    }

    #[test]
    fn arm_vfp_desc_zero_extends_upper_sixteen_doubles() {
        let desc = arm_vfp_desc(&sample_regs());
        assert_eq!(desc.len(), 32 * 8 + 4);
        let d0 = u64::from_le_bytes(desc[0..8].try_into().unwrap());
        assert_eq!(d0, 0x1122_3344_5566_7788);
        let d16 = u64::from_le_bytes(desc[16 * 8..16 * 8 + 8].try_into().unwrap());
        assert_eq!(d16, 0);
        let fpscr = u32::from_le_bytes(desc[32 * 8..32 * 8 + 4].try_into().unwrap());
        assert_eq!(fpscr, 0x1234_5678);
    }

    #[test]
    fn write_core_file_produces_contiguous_phdr_offsets() {
        let dir = std::env::temp_dir().join(format!("coredump-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("core");

        let regions = vec![MemoryRegion::new(0x1000, 16), MemoryRegion::new(0x2000, 32)];
        let regs = sample_regs();

        write_core_file(&path, &regions, &regs, DEFAULT_CRASH_SIGNAL, |region| {
            Ok(vec![0xaa; region.size as usize])
        })
        .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let phoff = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;
        let phnum = u16::from_le_bytes(bytes[44..46].try_into().unwrap()) as usize;
        assert_eq!(phnum, 3);

        let first_offset = u32::from_le_bytes(bytes[phoff + 4..phoff + 8].try_into().unwrap());
        assert_eq!(first_offset, (ELF32_EHDR_SIZE + phnum * ELF32_PHDR_SIZE) as u32);

        let first_filesz = u32::from_le_bytes(bytes[phoff + 16..phoff + 20].try_into().unwrap());
        let second_offset = u32::from_le_bytes(bytes[phoff + 32 + 4..phoff + 32 + 8].try_into().unwrap());
        assert_eq!(second_offset, first_offset + first_filesz);

        let note_phdr = phoff + 2 * ELF32_PHDR_SIZE;
        let note_type = u32::from_le_bytes(bytes[note_phdr..note_phdr + 4].try_into().unwrap());
        assert_eq!(note_type, PT_NOTE);

        std::fs::remove_dir_all(&dir).ok();
    }
}
