//! Minimal ELF64 `PT_LOAD` loader for the `spawn` syscall. Grounded on
//! `doublegate-VeridianOS/kernel/src/elf.rs`'s header/program-header
//! validation and segment walk, and the original `uefi/elf64.c` loader
//! (same algorithm, reused here post-boot for user process images
//! instead of pre-boot kernel chainloading). Because every physical
//! frame is identity mapped in the kernel's own address space (C3),
//! segment bytes are written through the frame's physical address
//! directly rather than by temporarily switching CR3/TTBR0 into the
//! target address space.

use alloc::vec::Vec;
use core::mem;

use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, vmm, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    osabi: u8,
    abiversion: u8,
    pad: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    offset: u64,
    vaddr: u64,
    _paddr: u64,
    filesz: u64,
    memsz: u64,
    _align: u64,
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_2LSB: u8 = 1;

const PT_LOAD: u32 = 1;
const PF_W: u32 = 0x2;
const PF_X: u32 = 0x1;

/// Lowest virtual address a `PT_LOAD` segment may target. Every
/// per-task address space shares the kernel root's top-level entries
/// (see `mm::vmm::create_address_space`), and the kernel's own identity
/// map of physical RAM lives in PML4/L4 slot 0 (virtual addresses below
/// 2^39); a segment placed there would silently write into the shared
/// identity-map subtree instead of a private user mapping. Linking user
/// binaries above this address keeps them out of slot 0.
const USER_LOAD_MIN: u64 = 1u64 << 39;

#[cfg(target_arch = "x86_64")]
const EXPECTED_MACHINE: u16 = 0x3E;
#[cfg(target_arch = "aarch64")]
const EXPECTED_MACHINE: u16 = 0xB7;

fn header(data: &[u8]) -> KernelResult<&Elf64Header> {
    if data.len() < mem::size_of::<Elf64Header>() {
        return Err(KernelError::InvalidArgument {
            name: "elf_image",
            value: "too_small_for_header",
        });
    }
    // SAFETY: length checked above; `Elf64Header` has no padding bytes
    // that alias invalid values (every field is a plain integer/array).
    let header = unsafe { &*(data.as_ptr() as *const Elf64Header) };
    if header.magic != ELF_MAGIC {
        return Err(KernelError::InvalidArgument { name: "elf_image", value: "bad_magic" });
    }
    if header.class != ELF_CLASS_64 || header.data != ELF_DATA_2LSB {
        return Err(KernelError::InvalidArgument {
            name: "elf_image",
            value: "not_le_64bit",
        });
    }
    if header.machine != EXPECTED_MACHINE {
        return Err(KernelError::InvalidArgument {
            name: "elf_image",
            value: "wrong_machine",
        });
    }
    Ok(header)
}

fn program_headers<'a>(data: &'a [u8], header: &Elf64Header) -> KernelResult<&'a [Elf64ProgramHeader]> {
    let start = header.phoff as usize;
    let count = header.phnum as usize;
    let entry_size = header.phentsize as usize;
    if entry_size != mem::size_of::<Elf64ProgramHeader>() {
        return Err(KernelError::InvalidArgument {
            name: "elf_image",
            value: "unexpected_phentsize",
        });
    }
    let end = start.checked_add(entry_size * count).ok_or(KernelError::InvalidArgument {
        name: "elf_image",
        value: "phdr_table_overflow",
    })?;
    if end > data.len() {
        return Err(KernelError::InvalidArgument {
            name: "elf_image",
            value: "phdr_table_out_of_bounds",
        });
    }
    // SAFETY: bounds checked above; `Elf64ProgramHeader` is plain data.
    Ok(unsafe { core::slice::from_raw_parts(data.as_ptr().add(start) as *const Elf64ProgramHeader, count) })
}

/// Load every `PT_LOAD` segment of `data` into `address_space`, return
/// the entry point. Allocates fresh frames for each page the segment
/// covers (no demand paging, no copy-on-write — both out of scope).
pub fn load(data: &[u8], address_space: PhysAddr) -> KernelResult<u64> {
    let elf_header = header(data)?;
    let phdrs = program_headers(data, elf_header)?;

    for ph in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        if ph.filesz > ph.memsz {
            return Err(KernelError::InvalidArgument {
                name: "elf_segment",
                value: "filesz_exceeds_memsz",
            });
        }
        let file_end = (ph.offset as usize).checked_add(ph.filesz as usize).ok_or(
            KernelError::InvalidArgument { name: "elf_segment", value: "file_range_overflow" },
        )?;
        if file_end > data.len() {
            return Err(KernelError::InvalidArgument {
                name: "elf_segment",
                value: "file_range_out_of_bounds",
            });
        }

        let vaddr = ph.vaddr;
        if vaddr < USER_LOAD_MIN {
            return Err(KernelError::AddressSpaceViolation { addr: vaddr as usize });
        }
        let page_start = vaddr & !(PAGE_SIZE as u64 - 1);
        let page_end = (vaddr + ph.memsz + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let num_pages = ((page_end - page_start) / PAGE_SIZE as u64) as usize;

        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if ph.p_flags & PF_W != 0 {
            flags |= PageFlags::WRITABLE;
        }
        if ph.p_flags & PF_X == 0 {
            flags |= PageFlags::NO_EXECUTE;
        }

        let mut frames = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let frame = frame_allocator::alloc_pages(1).ok_or(KernelError::OutOfMemory {
                requested: PAGE_SIZE,
                available: frame_allocator::free_bytes(),
            })?;
            let phys = PhysAddr::new((frame * PAGE_SIZE) as u64);
            // SAFETY: `phys` is a frame just allocated and exclusively
            // owned; physical RAM is identity mapped in the kernel's
            // own address space by C3.
            unsafe { core::ptr::write_bytes(phys.as_usize() as *mut u8, 0, PAGE_SIZE) };
            vmm::map(address_space, VirtAddr::new(page_start + (i as u64) * PAGE_SIZE as u64), phys, 1, flags)?;
            frames.push(phys);
        }

        let segment_start_in_first_page = (vaddr - page_start) as usize;
        let mut written = 0usize;
        let filesz = ph.filesz as usize;
        let src = &data[ph.offset as usize..file_end];
        for (i, frame) in frames.iter().enumerate() {
            let page_offset = if i == 0 { segment_start_in_first_page } else { 0 };
            let writable_len = (PAGE_SIZE - page_offset).min(filesz - written);
            if writable_len == 0 {
                break;
            }
            // SAFETY: see the zeroing write above; `page_offset +
            // writable_len <= PAGE_SIZE` by construction.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    src.as_ptr().add(written),
                    (frame.as_usize() + page_offset) as *mut u8,
                    writable_len,
                );
            }
            written += writable_len;
        }
    }

    Ok(elf_header.entry)
}
