//! C2 — Physical Memory Manager.
//!
//! A dense bitmap indexed by frame id, one bit per 4 KiB frame: 1 means
//! USED or RESERVED, 0 means FREE. Grounded on
//! `original_source/kernel/src/pmm.cpp`: same scan-memory-map-for-upper-
//! bound, place-bitmap-in-first-big-enough-Conventional-region, mark-all-
//! used-then-clear-Conventional-then-reserve-bitmap-and-framebuffer
//! sequence, reimplemented as a safe bit-scan over a `&'static mut [u8]`
//! instead of hand-rolled `bset`/`bclr`/`bget` helpers.

use spin::Mutex;

use crate::{
    boot_info::{BootInfo, EFI_CONVENTIONAL_MEMORY},
    error::{KernelError, KernelResult},
    mm::PAGE_SIZE,
};

/// Upper bound on physical address space we will ever bitmap, mirroring
/// the `MMIO_BOUNDARY` guard in the original PMM: memory-map descriptors
/// claiming physical addresses beyond this are ignored as bogus/MMIO.
const MMIO_BOUNDARY: u64 = 64 * 1024 * 1024 * 1024 * 1024; // 64 TiB

pub struct PhysicalMemoryManager {
    bitmap: &'static mut [u8],
    /// Number of frames tracked (== bitmap.len() * 8, modulo the last
    /// partial byte).
    frame_count: usize,
    free_frames: usize,
}

impl PhysicalMemoryManager {
    fn bit(bitmap: &[u8], frame: usize) -> bool {
        bitmap[frame / 8] & (1 << (frame % 8)) != 0
    }

    fn set_bit(bitmap: &mut [u8], frame: usize) {
        bitmap[frame / 8] |= 1 << (frame % 8);
    }

    fn clear_bit(bitmap: &mut [u8], frame: usize) {
        bitmap[frame / 8] &= !(1 << (frame % 8));
    }

    /// First-fit scan for `n` contiguous clear bits. Tie-break: first-fit
    /// over best-fit, per spec.md §4.1 "simplicity; predictable boot
    /// behavior".
    pub fn alloc_pages(&mut self, n: usize) -> Option<usize> {
        if n == 0 || n > self.frame_count {
            return None;
        }
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for frame in 0..self.frame_count {
            if !Self::bit(self.bitmap, frame) {
                if run_len == 0 {
                    run_start = frame;
                }
                run_len += 1;
                if run_len == n {
                    for f in run_start..run_start + n {
                        Self::set_bit(self.bitmap, f);
                    }
                    self.free_frames -= n;
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    /// Clear `n` bits starting at `frame_id`. Clearing an already-clear
    /// bit (double-free) is a no-op, per spec.md §4.1.
    pub fn free_pages(&mut self, frame_id: usize, n: usize) {
        for f in frame_id..frame_id.saturating_add(n).min(self.frame_count) {
            if Self::bit(self.bitmap, f) {
                Self::clear_bit(self.bitmap, f);
                self.free_frames += 1;
            }
        }
    }

    /// Idempotently mark `n` frames starting at `base` USED.
    pub fn reserve_range(&mut self, base: usize, n: usize) {
        for f in base..base.saturating_add(n).min(self.frame_count) {
            if !Self::bit(self.bitmap, f) {
                Self::set_bit(self.bitmap, f);
                self.free_frames -= 1;
            }
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.frame_count * PAGE_SIZE
    }

    pub fn free_bytes(&self) -> usize {
        self.free_frames * PAGE_SIZE
    }

    pub fn used_bytes(&self) -> usize {
        self.total_bytes() - self.free_bytes()
    }
}

static PMM: Mutex<Option<PhysicalMemoryManager>> = Mutex::new(None);

/// Scan the firmware memory map, size and place the bitmap, and mark
/// every frame outside a `Conventional` region (plus the bitmap's own
/// frames and the framebuffer's frames) USED. Returns the highest
/// physical address considered RAM-like.
///
/// # Safety
/// Must be called exactly once, before any other frame is allocated, and
/// while the identity-style mapping the firmware left active still
/// covers all of physical RAM (true until C3's `init_identity` replaces
/// it with the kernel's own table, which re-covers the same range).
pub unsafe fn init(boot_info: &BootInfo) -> KernelResult<u64> {
    let mut guard = PMM.lock();
    if guard.is_some() {
        return Err(KernelError::AlreadyInitialized { subsystem: "pmm" });
    }

    let mut upper_bound = 0u64;
    for desc in boot_info.memory_map() {
        let end = desc.physical_start.saturating_add(desc.num_pages * PAGE_SIZE as u64);
        if end <= MMIO_BOUNDARY && end > upper_bound {
            upper_bound = end;
        }
    }

    let frame_count = upper_bound.div_ceil(PAGE_SIZE as u64) as usize;
    let bitmap_bytes = frame_count.div_ceil(8);
    let bitmap_pages = bitmap_bytes.div_ceil(PAGE_SIZE);
    let bitmap_bytes_reserved = bitmap_pages * PAGE_SIZE;

    // Find the first Conventional region large enough to hold the bitmap.
    let mut bitmap_phys = None;
    for desc in boot_info.memory_map() {
        if desc.ty == EFI_CONVENTIONAL_MEMORY
            && desc.num_pages * PAGE_SIZE as u64 >= bitmap_bytes_reserved as u64
        {
            bitmap_phys = Some(desc.physical_start);
            break;
        }
    }
    let bitmap_phys = bitmap_phys.ok_or(KernelError::OutOfMemory {
        requested: bitmap_bytes_reserved,
        available: 0,
    })?;

    // SAFETY: bitmap_phys..+bitmap_bytes_reserved lies inside a
    // Conventional region reported by firmware and is identity-accessible
    // before C3 replaces the page tables.
    let bitmap: &'static mut [u8] = unsafe {
        core::slice::from_raw_parts_mut(bitmap_phys as *mut u8, bitmap_bytes_reserved)
    };
    bitmap.fill(0xFF); // everything USED until proven Conventional

    let mut pmm = PhysicalMemoryManager {
        bitmap,
        frame_count,
        free_frames: 0,
    };

    for desc in boot_info.memory_map() {
        if desc.ty == EFI_CONVENTIONAL_MEMORY {
            let start_frame = (desc.physical_start / PAGE_SIZE as u64) as usize;
            let pages = desc.num_pages as usize;
            for f in start_frame..(start_frame + pages).min(frame_count) {
                if PhysicalMemoryManager::bit(pmm.bitmap, f) {
                    PhysicalMemoryManager::clear_bit(pmm.bitmap, f);
                    pmm.free_frames += 1;
                }
            }
        }
    }

    // Re-mark the bitmap's own frames and the framebuffer's frames USED.
    let bitmap_start_frame = (bitmap_phys / PAGE_SIZE as u64) as usize;
    pmm.reserve_range(bitmap_start_frame, bitmap_pages);

    let fb_start_frame = (boot_info.framebuffer_base / PAGE_SIZE as u64) as usize;
    let fb_pages = (boot_info.framebuffer_size as u64).div_ceil(PAGE_SIZE as u64) as usize;
    pmm.reserve_range(fb_start_frame, fb_pages);

    *guard = Some(pmm);
    Ok(upper_bound)
}

fn with_pmm<R>(f: impl FnOnce(&mut PhysicalMemoryManager) -> R) -> R {
    let mut guard = PMM.lock();
    let pmm = guard.as_mut().expect("pmm::init must run before use");
    f(pmm)
}

pub fn alloc_pages(n: usize) -> Option<usize> {
    with_pmm(|pmm| pmm.alloc_pages(n))
}

pub fn free_pages(frame_id: usize, n: usize) {
    with_pmm(|pmm| pmm.free_pages(frame_id, n));
}

pub fn reserve_range(base: usize, n: usize) {
    with_pmm(|pmm| pmm.reserve_range(base, n));
}

pub fn total_bytes() -> usize {
    with_pmm(|pmm| pmm.total_bytes())
}

pub fn free_bytes() -> usize {
    with_pmm(|pmm| pmm.free_bytes())
}

pub fn used_bytes() -> usize {
    with_pmm(|pmm| pmm.used_bytes())
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    /// Build a standalone allocator over a caller-owned buffer, bypassing
    /// `init()`'s firmware-memory-map scan, to exercise the alloc/free bit
    /// logic on the host test target (testable properties 1 and 2).
    fn fake_pmm(buf: &'static mut [u8], frame_count: usize) -> PhysicalMemoryManager {
        buf.fill(0);
        PhysicalMemoryManager {
            bitmap: buf,
            frame_count,
            free_frames: frame_count,
        }
    }

    #[test]
    fn roundtrip_restores_free_bytes() {
        let buf: &'static mut [u8] = Box::leak(alloc::vec![0u8; 16].into_boxed_slice());
        let mut pmm = fake_pmm(buf, 100);
        let before = pmm.free_bytes();
        let frame = pmm.alloc_pages(10).unwrap();
        pmm.free_pages(frame, 10);
        assert_eq!(pmm.free_bytes(), before);
    }

    #[test]
    fn double_free_is_noop() {
        let buf: &'static mut [u8] = Box::leak(alloc::vec![0u8; 16].into_boxed_slice());
        let mut pmm = fake_pmm(buf, 100);
        let frame = pmm.alloc_pages(4).unwrap();
        pmm.free_pages(frame, 4);
        let before = pmm.free_frames;
        pmm.free_pages(frame, 4);
        assert_eq!(pmm.free_frames, before);
    }

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let buf: &'static mut [u8] = Box::leak(alloc::vec![0u8; 16].into_boxed_slice());
        let mut pmm = fake_pmm(buf, 100);
        let a = pmm.alloc_pages(5).unwrap();
        let b = pmm.alloc_pages(5).unwrap();
        let a_range = a..a + 5;
        assert!(!a_range.contains(&b));
    }

    #[test]
    fn alloc_first_fit_picks_earliest_run() {
        let buf: &'static mut [u8] = Box::leak(alloc::vec![0u8; 16].into_boxed_slice());
        let mut pmm = fake_pmm(buf, 100);
        let first = pmm.alloc_pages(1).unwrap();
        pmm.free_pages(first, 1);
        let second = pmm.alloc_pages(1).unwrap();
        assert_eq!(first, second);
    }
}
