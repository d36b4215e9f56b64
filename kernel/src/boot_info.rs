//! The contract between the UEFI loader (`boot/`) and the kernel entry
//! point. Layout is part of the kernel ABI — see spec §6 — and must not be
//! reordered or resized.

/// Firmware memory-map descriptor type codes that are "RAM-like" for the
/// purposes of C2 init: the PMM may hand these frames out to callers.
pub const EFI_CONVENTIONAL_MEMORY: u32 = 7;

/// A single UEFI memory-map descriptor. The firmware's real descriptor may
/// be larger (`BootInfo::descriptor_size`); only the leading fields are
/// interpreted here, matching the documented layout in spec §6.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MemoryDescriptor {
    pub ty: u32,
    pub _pad: u32,
    pub physical_start: u64,
    pub virtual_start: u64,
    pub num_pages: u64,
    pub attribute: u64,
}

/// The structure the UEFI loader hands to the kernel entry point.
///
/// Offsets are the contract, not just the field order: the loader is a
/// separate compilation unit (potentially built by a different compiler
/// version), so this struct is `#[repr(C, packed)]` — plain `#[repr(C)]`
/// would insert 4 bytes of padding before `memory_map_ptr` (a `u64`
/// following fields that only sum to 28 bytes), silently shifting every
/// offset below out from under the documented/spec §6 contract.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BootInfo {
    /// offset 0: physical base address of the linear framebuffer.
    pub framebuffer_base: u64,
    /// offset 8
    pub framebuffer_size: u32,
    /// offset 12
    pub width: u32,
    /// offset 16
    pub height: u32,
    /// offset 20: pixels per scanline.
    pub pitch: u32,
    /// offset 24: 0 = RGB, nonzero = BGR.
    pub pixel_format: u32,
    /// offset 28: physical, identity-accessible pointer to the first
    /// memory-map descriptor.
    pub memory_map_ptr: u64,
    /// offset 36: total size in bytes of the memory map.
    pub memory_map_size: u64,
    /// offset 44: size in bytes of one descriptor record (may exceed
    /// `size_of::<MemoryDescriptor>()`; firmware is permitted to append
    /// trailing fields).
    pub descriptor_size: u32,
    /// offset 48
    pub descriptor_version: u32,
}

impl BootInfo {
    /// Iterate the firmware memory map. Descriptor records are
    /// `descriptor_size` bytes apart, which may not equal
    /// `size_of::<MemoryDescriptor>()`; we only ever read the documented
    /// leading fields out of each record.
    pub fn memory_map(&self) -> MemoryMapIter {
        MemoryMapIter {
            ptr: self.memory_map_ptr as *const u8,
            stride: self.descriptor_size as usize,
            remaining: (self.memory_map_size / self.descriptor_size as u64) as usize,
        }
    }
}

pub struct MemoryMapIter {
    ptr: *const u8,
    stride: usize,
    remaining: usize,
}

impl Iterator for MemoryMapIter {
    type Item = MemoryDescriptor;

    fn next(&mut self) -> Option<MemoryDescriptor> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: `memory_map_ptr` is physical and identity-accessible per
        // the BootInfo contract; `stride` comes from firmware and each
        // record is guaranteed at least as large as `MemoryDescriptor`.
        let desc = unsafe { core::ptr::read_unaligned(self.ptr as *const MemoryDescriptor) };
        self.ptr = unsafe { self.ptr.add(self.stride) };
        self.remaining -= 1;
        Some(desc)
    }
}
