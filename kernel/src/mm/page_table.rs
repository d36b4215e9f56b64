//! Architecture-agnostic 4-level page table walk, shared by x86-64 (PML4→
//! PDPT→PD→PT) and AArch64 (identical 4-level, 9-bit-index structure under
//! the `virt` machine's 48-bit VA configuration this kernel targets).
//!
//! Grounded on `doublegate-VeridianOS/kernel/src/mm/page_table.rs`
//! (`PageTableEntry`, `PageTable`, `VirtualAddressBreakdown`, the on-demand
//! intermediate-table-allocation walk in `PageMapper`), trimmed of the
//! NUMA-aware `allocate_frames(count, numa_node)` parameter the teacher
//! threads through (this kernel is single-CPU, no NUMA).
//!
//! Because C3's identity map covers all of physical RAM, a page table's
//! own physical address doubles as a valid virtual address for the
//! kernel's own accesses to it — this walker never needs a separate
//! "physical memory window" the way a higher-half kernel would.

use crate::{
    error::{KernelError, KernelResult},
    mm::{frame_allocator, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE},
};

pub const ENTRIES: usize = 512;

#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_present(self) -> bool {
        PageFlags::from_bits_truncate(self.0).contains(PageFlags::PRESENT)
    }

    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & Self::ADDR_MASK)
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub fn set(&mut self, addr: PhysAddr, flags: PageFlags) {
        self.0 = (addr.as_u64() & Self::ADDR_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

impl PageTable {
    pub fn zeroed_at(phys: PhysAddr) -> &'static mut PageTable {
        // SAFETY: `phys` is a frame the caller just obtained from the PMM
        // and owns exclusively; physical RAM is identity-mapped by C3, so
        // this cast is a valid `&'static mut` for as long as the caller
        // holds frame ownership.
        let table: &'static mut PageTable =
            unsafe { &mut *(phys.as_usize() as *mut PageTable) };
        for e in table.entries.iter_mut() {
            e.clear();
        }
        table
    }

    pub fn at(phys: PhysAddr) -> &'static mut PageTable {
        // SAFETY: same as `zeroed_at`, for an already-initialized table.
        unsafe { &mut *(phys.as_usize() as *mut PageTable) }
    }
}

impl core::ops::Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry {
        &self.entries[i]
    }
}

impl core::ops::IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }
}

/// A virtual address decomposed into 4 levels of 9-bit index plus a
/// 12-bit page offset. Shared by both architectures at the granularity
/// this kernel uses (4 KiB leaves, 2 MiB huge leaves at level 2).
pub struct VirtAddrBreakdown {
    pub l4: usize,
    pub l3: usize,
    pub l2: usize,
    pub l1: usize,
    pub offset: usize,
}

impl VirtAddrBreakdown {
    pub fn new(virt: VirtAddr) -> Self {
        let v = virt.as_u64();
        Self {
            l4: ((v >> 39) & 0x1ff) as usize,
            l3: ((v >> 30) & 0x1ff) as usize,
            l2: ((v >> 21) & 0x1ff) as usize,
            l1: ((v >> 12) & 0x1ff) as usize,
            offset: (v & 0xfff) as usize,
        }
    }
}

/// Walk from `root` to the leaf covering `virt`, allocating intermediate
/// tables on demand when `allocate` is set. Stamps the final leaf with
/// `leaf_flags` (ignored when only resolving, i.e. `leaf_flags` is
/// `None`). Huge (2 MiB) leaves are created at level 2 when `huge` is
/// set, skipping the level-1 table entirely.
pub fn walk_and_map(
    root: PhysAddr,
    virt: VirtAddr,
    phys: PhysAddr,
    leaf_flags: PageFlags,
    huge: bool,
) -> KernelResult<()> {
    let idx = VirtAddrBreakdown::new(virt);
    let l4 = PageTable::at(root);

    let l3_table = next_level(l4, idx.l4)?;
    let l3 = PageTable::at(l3_table);

    let l2_table = next_level(l3, idx.l3)?;
    let l2 = PageTable::at(l2_table);

    if huge {
        l2[idx.l2].set(phys, leaf_flags | PageFlags::HUGE);
        invalidate(virt);
        return Ok(());
    }

    let l1_table = next_level(l2, idx.l2)?;
    let l1 = PageTable::at(l1_table);
    l1[idx.l1].set(phys, leaf_flags);
    invalidate(virt);
    Ok(())
}

/// Ensure `table[index]` points at a present next-level table, allocating
/// one from the PMM if absent. Intermediate entries always get permissive
/// flags (`PRESENT|WRITABLE`); the leaf narrows permissions, per spec.md
/// §4.2.
fn next_level(table: &mut PageTable, index: usize) -> KernelResult<PhysAddr> {
    let entry = table[index];
    if entry.is_present() {
        return Ok(entry.addr());
    }
    let frame = frame_allocator::alloc_pages(1).ok_or(KernelError::OutOfMemory {
        requested: PAGE_SIZE,
        available: frame_allocator::free_bytes(),
    })?;
    let phys = PhysAddr::new((frame * PAGE_SIZE) as u64);
    PageTable::zeroed_at(phys);
    table[index].set(phys, PageFlags::INTERMEDIATE);
    Ok(phys)
}

/// Walk `root` for `virt` without allocating; returns `None` on any
/// not-present level, resolving both huge and 4 KiB leaves.
pub fn walk_resolve(root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
    let idx = VirtAddrBreakdown::new(virt);
    let l4 = PageTable::at(root);
    let e4 = l4[idx.l4];
    if !e4.is_present() {
        return None;
    }
    let l3 = PageTable::at(e4.addr());
    let e3 = l3[idx.l3];
    if !e3.is_present() {
        return None;
    }
    let l2 = PageTable::at(e3.addr());
    let e2 = l2[idx.l2];
    if !e2.is_present() {
        return None;
    }
    if e2.flags().contains(PageFlags::HUGE) {
        let huge_offset = (virt.as_u64() & ((1 << 21) - 1)) as u64;
        return Some(PhysAddr::new(e2.addr().as_u64() + huge_offset));
    }
    let l1 = PageTable::at(e2.addr());
    let e1 = l1[idx.l1];
    if !e1.is_present() {
        return None;
    }
    Some(PhysAddr::new(e1.addr().as_u64() + idx.offset as u64))
}

/// Like `walk_resolve`, but also returns the leaf's flags so callers can
/// check permissions (e.g. `USER`) rather than just presence.
pub fn walk_resolve_flags(root: PhysAddr, virt: VirtAddr) -> Option<(PhysAddr, PageFlags)> {
    let idx = VirtAddrBreakdown::new(virt);
    let l4 = PageTable::at(root);
    let e4 = l4[idx.l4];
    if !e4.is_present() {
        return None;
    }
    let l3 = PageTable::at(e4.addr());
    let e3 = l3[idx.l3];
    if !e3.is_present() {
        return None;
    }
    let l2 = PageTable::at(e3.addr());
    let e2 = l2[idx.l2];
    if !e2.is_present() {
        return None;
    }
    if e2.flags().contains(PageFlags::HUGE) {
        let huge_offset = virt.as_u64() & ((1 << 21) - 1);
        return Some((PhysAddr::new(e2.addr().as_u64() + huge_offset), e2.flags()));
    }
    let l1 = PageTable::at(e2.addr());
    let e1 = l1[idx.l1];
    if !e1.is_present() {
        return None;
    }
    Some((PhysAddr::new(e1.addr().as_u64() + idx.offset as u64), e1.flags()))
}

/// Invalidate any stale TLB entry for `virt`. Architecture-appropriate
/// single-page invalidation per spec.md §4.2's TLB policy.
fn invalidate(virt: VirtAddr) {
    #[cfg(target_arch = "x86_64")]
    {
        use x86_64::{instructions::tlb, VirtAddr as X86VirtAddr};
        tlb::flush(X86VirtAddr::new(virt.as_u64()));
    }
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `tlbi vaae1is` + context-synchronizing barriers, the
        // standard AArch64 single-VA TLB invalidation sequence.
        unsafe {
            core::arch::asm!(
                "dsb ishst",
                "tlbi vaae1is, {va}",
                "dsb ish",
                "isb",
                va = in(reg) (virt.as_u64() >> 12),
            );
        }
    }
}
