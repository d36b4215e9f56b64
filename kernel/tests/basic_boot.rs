//! Smoke test: C2 through C8 bring-up against a synthetic `BootInfo`
//! (no real firmware memory map), confirming the boot sequence in
//! `sylphia_kernel::kernel_main` reaches "entering scheduler" without a
//! fatal error. Grounded on `doublegate-VeridianOS`'s `tests/` layout
//! (`harness = false`, its own `_start`/panic handler) — run under QEMU
//! with `-device isa-debug-exit`, exercising spec.md §8 scenario S1
//! ("cold boot to idle").
#![no_std]
#![no_main]

use sylphia_kernel::boot_info::{BootInfo, MemoryDescriptor, EFI_CONVENTIONAL_MEMORY};
use sylphia_kernel::testing::{exit_qemu, QemuExitCode};
use sylphia_kernel::{mm, sched};

/// 64 MiB of host-visible "RAM" described by one Conventional memory
/// descriptor, large enough for the PMM bitmap, the identity map's own
/// tables, and the bump heap's first several allocations.
const RAM_BYTES: u64 = 64 * 1024 * 1024;

static mut RAM_DESCRIPTOR: MemoryDescriptor = MemoryDescriptor {
    ty: EFI_CONVENTIONAL_MEMORY,
    _pad: 0,
    physical_start: 0,
    virtual_start: 0,
    num_pages: RAM_BYTES / mm::PAGE_SIZE as u64,
    attribute: 0,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // SAFETY: single-threaded test entry, no concurrent access to the
    // statics below.
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

    // SAFETY: runs once, before any frame is allocated.
    let highest = unsafe { mm::frame_allocator::init(&boot_info) }.expect("C2 init must succeed");
    assert!(highest >= RAM_BYTES, "PMM must see the whole synthetic RAM region");

    // SAFETY: C2 just initialized; no other C3 init has run.
    unsafe { mm::vmm::init_identity(&boot_info) }.expect("C3 init must succeed");

    let heap_frame = mm::frame_allocator::alloc_pages(1).expect("reserve heap start frame");
    let heap_start = core::ptr::NonNull::new((heap_frame * mm::PAGE_SIZE) as *mut u8).unwrap();
    mm::heap::init(heap_start);

    sched::scheduler::init_idle().expect("idle task must be creatable");
    assert!(sched::scheduler::task_exists(sched::TaskId(1)), "idle task must be task id 1");

    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    sylphia_kernel::serial_println!("basic_boot test failed: {}", info);
    exit_qemu(QemuExitCode::Failed);
}
