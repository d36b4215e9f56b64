//! C3 — virtual memory manager. Grounded on
//! `doublegate-VeridianOS/kernel/src/mm/vmm.rs` (the identity-map-all-
//! physical-RAM bring-up strategy, `AddressSpace` as a bare page-table
//! root, `map_mmio` as the uncached-flags specialization of `map`),
//! trimmed of the teacher's higher-half kernel split and per-process
//! `Vma` bookkeeping — this kernel has a single flat identity map for
//! the kernel plus one small per-task mapping for user code/stack, no
//! general VMA tree.

use spin::Mutex;

use crate::{
    arch,
    boot_info::BootInfo,
    error::{KernelError, KernelResult},
    mm::{frame_allocator, page_table, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE},
};

/// The kernel's own address space root, used for every identity mapping
/// and for context switches back into kernel tasks.
static KERNEL_ROOT: Mutex<Option<PhysAddr>> = Mutex::new(None);

/// Identity-map every byte of physical RAM the firmware reported, plus
/// the framebuffer, using 2 MiB huge pages where alignment allows. Run
/// once during boot, after C2 is initialized.
pub unsafe fn init_identity(boot_info: &BootInfo) -> KernelResult<()> {
    let root_frame = frame_allocator::alloc_pages(1).ok_or(KernelError::OutOfMemory {
        requested: PAGE_SIZE,
        available: frame_allocator::free_bytes(),
    })?;
    let root = PhysAddr::new((root_frame * PAGE_SIZE) as u64);
    page_table::PageTable::zeroed_at(root);

    let mut highest: u64 = 0;
    for region in boot_info.memory_map() {
        let end = region.physical_start + region.num_pages * PAGE_SIZE as u64;
        if end > highest {
            highest = end;
        }
    }
    let fb_end = boot_info.framebuffer_base + boot_info.framebuffer_size as u64;
    if fb_end > highest {
        highest = fb_end;
    }

    // spec.md §4.2: `mapped_limit` must also cover the bootstrap code's
    // own stack and instruction pointer (both still running unmapped
    // relative to the fresh root we're about to install) and never sit
    // below a 64 MiB floor, regardless of how small the reported memory
    // map is.
    highest = highest.max(arch::mmu::current_stack_pointer());
    highest = highest.max(arch::mmu::current_instruction_pointer());
    const MIN_MAPPED_LIMIT: u64 = 64 * 1024 * 1024;
    highest = highest.max(MIN_MAPPED_LIMIT);

    const HUGE_PAGE: u64 = 2 * 1024 * 1024;
    let mut addr = 0u64;
    while addr < highest {
        page_table::walk_and_map(
            root,
            VirtAddr::new(addr),
            PhysAddr::new(addr),
            PageFlags::PRESENT | PageFlags::WRITABLE,
            true,
        )?;
        addr += HUGE_PAGE;
    }

    *KERNEL_ROOT.lock() = Some(root);
    // SAFETY: `root` is a fully populated identity map, valid to install
    // as the live translation root.
    unsafe { arch::mmu::set_root(root) };
    Ok(())
}

/// Map `size` bytes of MMIO starting at `phys` to the identical virtual
/// address, uncached and non-executable, per spec.md §4.2's `map_mmio`.
/// Panics (kernel-fatal) only on genuine PMM exhaustion while allocating
/// intermediate tables — this always runs during single-threaded device
/// bring-up, where there is no caller to usefully propagate a `Result`
/// to.
pub fn map_mmio(virt: VirtAddr, phys: PhysAddr, size: usize) {
    let root = KERNEL_ROOT.lock().expect("mm::vmm::init_identity must run before map_mmio");
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let off = (i * PAGE_SIZE) as u64;
        page_table::walk_and_map(
            root,
            VirtAddr::new(virt.as_u64() + off),
            PhysAddr::new(phys.as_u64() + off),
            PageFlags::MMIO,
            false,
        )
        .expect("MMIO mapping must not exhaust the frame allocator during device bring-up");
    }
}

/// Map `count` contiguous pages from `phys` to `virt` in the given
/// address space with `flags`, per spec.md §4.2's `map`.
pub fn map(
    root: PhysAddr,
    virt: VirtAddr,
    phys: PhysAddr,
    count: usize,
    flags: PageFlags,
) -> KernelResult<()> {
    for i in 0..count {
        let off = (i * PAGE_SIZE) as u64;
        page_table::walk_and_map(
            root,
            VirtAddr::new(virt.as_u64() + off),
            PhysAddr::new(phys.as_u64() + off),
            flags,
            false,
        )?;
    }
    Ok(())
}

/// Resolve `virt` to its backing physical address in `root`'s address
/// space, or `None` if unmapped.
pub fn virt_to_phys(root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
    page_table::walk_resolve(root, virt)
}

/// Confirm every page covering `[virt, virt+len)` is present and
/// `USER`-accessible in `root`'s address space. Used by `syscall::
/// dispatch` to bounds-check a pointer argument before dereferencing it,
/// per spec.md §4.8 ("must not inspect memory that user mode has not
/// explicitly passed").
pub fn validate_user_range(root: PhysAddr, virt: VirtAddr, len: usize) -> bool {
    if len == 0 {
        return true;
    }
    let first_page = virt.align_down(PAGE_SIZE as u64);
    let last_byte = VirtAddr::new(virt.as_u64() + len as u64 - 1);
    let last_page = last_byte.align_down(PAGE_SIZE as u64);
    let mut page = first_page;
    loop {
        match page_table::walk_resolve_flags(root, page) {
            Some((_, flags)) if flags.contains(PageFlags::USER) => {}
            _ => return false,
        }
        if page == last_page {
            return true;
        }
        page = VirtAddr::new(page.as_u64() + PAGE_SIZE as u64);
    }
}

/// Allocate a fresh top-level table for a new task's address space,
/// seeded with the kernel root's own top-level entries. The SYSCALL/SVC
/// entry path never reloads the translation root, so the kernel's own
/// identity-mapped code, heap, and MMIO windows must already be visible
/// through whatever address space happens to be active when a user task
/// traps in — sharing the top-level entries (each still pointing at the
/// kernel's own lower-level tables) is what makes that true without
/// copying the whole identity map into every process.
pub fn create_address_space() -> KernelResult<PhysAddr> {
    let frame = frame_allocator::alloc_pages(1).ok_or(KernelError::OutOfMemory {
        requested: PAGE_SIZE,
        available: frame_allocator::free_bytes(),
    })?;
    let root = PhysAddr::new((frame * PAGE_SIZE) as u64);
    let table = page_table::PageTable::zeroed_at(root);

    let kernel_root = kernel_root();
    let kernel_table = page_table::PageTable::at(kernel_root);
    for i in 0..page_table::ENTRIES {
        table[i] = kernel_table[i];
    }

    Ok(root)
}

/// Return `root`'s top-level frame to the PMM. Per spec.md §9's scope,
/// this kernel does not walk and free every mapped leaf — user tasks
/// are small, single-binary, and torn down in bulk at process exit,
/// mirroring the bump heap's own no-reclaim design.
pub fn destroy_address_space(root: PhysAddr) {
    frame_allocator::free_pages(root.frame_id(), 1);
}

pub fn kernel_root() -> PhysAddr {
    KERNEL_ROOT.lock().expect("mm::vmm::init_identity must run before kernel_root")
}
