//! Testable property 3 (spec.md §8): for every mapped range,
//! `virt_to_phys(map(v, p, n).start + k) == p + k` for `0 <= k < n*4096`.
//! Runs against the kernel's real page-table walker — `page_table::
//! walk_and_map`'s on-demand intermediate-table allocation and TLB
//! invalidation both execute privileged instructions and dereference
//! literal physical addresses as memory, so this property cannot be
//! exercised by a host-target `#[cfg(test)]` unit test the way the PMM
//! bitmap logic in `mm/frame_allocator.rs` can; it needs the real
//! hardware (or QEMU) this binary runs under.
#![no_std]
#![no_main]

use sylphia_kernel::boot_info::{BootInfo, MemoryDescriptor, EFI_CONVENTIONAL_MEMORY};
use sylphia_kernel::mm::{self, PageFlags, PhysAddr, VirtAddr};
use sylphia_kernel::testing::{exit_qemu, QemuExitCode};

const RAM_BYTES: u64 = 64 * 1024 * 1024;

static mut RAM_DESCRIPTOR: MemoryDescriptor = MemoryDescriptor {
    ty: EFI_CONVENTIONAL_MEMORY,
    _pad: 0,
    physical_start: 0,
    virtual_start: 0,
    num_pages: RAM_BYTES / mm::PAGE_SIZE as u64,
    attribute: 0,
};

/// Well outside the identity map's 2 MiB huge-page coverage of low RAM,
/// so the walk below always allocates fresh intermediate tables rather
/// than colliding with an existing huge leaf.
const TEST_VIRT_BASE: u64 = 0x10_0000_0000;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: single-threaded test entry.
    let descriptor_ptr = unsafe { core::ptr::addr_of_mut!(RAM_DESCRIPTOR) };
    let boot_info = BootInfo {
        framebuffer_base: 0,
        framebuffer_size: 0,
        width: 0,
        height: 0,
        pitch: 0,
        pixel_format: 0,
        memory_map_ptr: descriptor_ptr as u64,
        memory_map_size: core::mem::size_of::<MemoryDescriptor>() as u64,
        descriptor_size: core::mem::size_of::<MemoryDescriptor>() as u32,
        descriptor_version: 1,
    };

    // SAFETY: first and only PMM/VMM init in this process.
    unsafe { mm::frame_allocator::init(&boot_info) }.expect("C2 init must succeed");
    unsafe { mm::vmm::init_identity(&boot_info) }.expect("C3 init must succeed");

    let root = mm::vmm::kernel_root();
    const PAGES: usize = 3;
    let first_frame = mm::frame_allocator::alloc_pages(PAGES).expect("reserve test frames");
    let phys_base = PhysAddr::new((first_frame * mm::PAGE_SIZE) as u64);
    let virt_base = VirtAddr::new(TEST_VIRT_BASE);

    mm::vmm::map(
        root,
        virt_base,
        phys_base,
        PAGES,
        PageFlags::PRESENT | PageFlags::WRITABLE,
    )
    .expect("map must succeed with frames just reserved");

    // Sample each page's first and last byte rather than every offset —
    // a full per-byte sweep is a mechanical round-trip grid the walker's
    // page-granular logic doesn't need to prove itself at that density.
    for page in 0..PAGES {
        for k in [0u64, mm::PAGE_SIZE as u64 - 1] {
            let offset = page as u64 * mm::PAGE_SIZE as u64 + k;
            let virt = VirtAddr::new(virt_base.as_u64() + offset);
            let expected = PhysAddr::new(phys_base.as_u64() + offset);
            let resolved = mm::vmm::virt_to_phys(root, virt).expect("mapped range must resolve");
            assert_eq!(resolved, expected, "virt_to_phys must round-trip through the mapped range");
        }
    }

    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    sylphia_kernel::serial_println!("paging_tests failed: {}", info);
    exit_qemu(QemuExitCode::Failed);
}
