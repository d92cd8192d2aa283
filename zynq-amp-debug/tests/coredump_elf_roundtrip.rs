//! Black-box check that a written core file is a standard ELF32 core a
//! third-party reader can parse, not just bytes this crate's own writer
//! happens to agree with itself about. Mirrors how the teacher pack reads
//! its own core dumps back with `object` in `probe-rs/src/core/dump.rs`
//! (`ElfFile32::parse`, `Object::architecture`/`kind`, `elf_program_headers`).

use object::elf::{PT_LOAD, PT_NOTE};
use object::read::elf::{ElfFile32, ProgramHeader};
use object::{Architecture, Object, ObjectKind};

use zynq_amp_debug::coredump::{write_core_file, DEFAULT_CRASH_SIGNAL};
use zynq_amp_debug::{MemoryRegion, RegisterCache};

fn write_sample(path: &std::path::Path, regions: &[MemoryRegion]) {
    let regs = RegisterCache::default();
    write_core_file(path, regions, &regs, DEFAULT_CRASH_SIGNAL, |region| {
        Ok(vec![0x5au8; region.size as usize])
    })
    .unwrap();
}

#[test]
fn written_core_file_parses_as_elf32_arm_core() {
    let dir = std::env::temp_dir().join(format!(
        "zynq-amp-coredump-elf-test-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("core");

    let regions = vec![
        MemoryRegion::new(0x0000_0000, 0x1000),
        MemoryRegion::new(0x7d80_0000, 0x2000),
    ];
    write_sample(&path, &regions);

    let bytes = std::fs::read(&path).unwrap();
    let elf = ElfFile32::<object::Endianness>::parse(bytes.as_slice()).unwrap();

    assert_eq!(elf.kind(), ObjectKind::Core);
    assert_eq!(elf.architecture(), Architecture::Arm);

    let endian = elf.endianness();
    let phdrs = elf.elf_program_headers();
    assert_eq!(phdrs.len(), regions.len() + 1);

    let load_phdrs: Vec<_> = phdrs.iter().filter(|p| p.p_type(endian) == PT_LOAD).collect();
    assert_eq!(load_phdrs.len(), regions.len());

    for (phdr, region) in load_phdrs.iter().zip(&regions) {
        assert_eq!(phdr.p_vaddr(endian), region.base);
        assert_eq!(phdr.p_filesz(endian), region.size);
        assert_eq!(phdr.p_filesz(endian), phdr.p_memsz(endian));
    }

    let note_phdrs: Vec<_> = phdrs.iter().filter(|p| p.p_type(endian) == PT_NOTE).collect();
    assert_eq!(note_phdrs.len(), 1, "exactly one PT_NOTE segment");
    assert_eq!(
        phdrs.last().unwrap().p_type(endian),
        PT_NOTE,
        "PT_NOTE is the last program header"
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn program_header_offsets_are_contiguous() {
    let dir = std::env::temp_dir().join(format!(
        "zynq-amp-coredump-elf-test-contig-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("core");

    let regions = vec![
        MemoryRegion::new(0x1000, 0x40),
        MemoryRegion::new(0x2000, 0x80),
        MemoryRegion::new(0x3000, 0x20),
    ];
    write_sample(&path, &regions);

    let bytes = std::fs::read(&path).unwrap();
    let elf = ElfFile32::<object::Endianness>::parse(bytes.as_slice()).unwrap();
    let endian = elf.endianness();
    let phdrs = elf.elf_program_headers();

    let mut offsets_and_sizes: Vec<(u32, u32)> = phdrs
        .iter()
        .map(|p| (p.p_offset(endian), p.p_filesz(endian)))
        .collect();
    offsets_and_sizes.sort_by_key(|&(offset, _)| offset);

    for window in offsets_and_sizes.windows(2) {
        let (offset, size) = window[0];
        let (next_offset, _) = window[1];
        assert_eq!(offset + size, next_offset, "phdrs must be back-to-back");
    }

    std::fs::remove_dir_all(&dir).ok();
}
