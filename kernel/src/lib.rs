//! Sylphia-OS kernel core: C1–C10 as named in spec.md §3/§4. Library
//! crate so `kernel/tests/*.rs` integration tests and host-target unit
//! tests can link against the same code the `sylphia-kernel` binary
//! boots, mirroring `doublegate-VeridianOS/kernel/src/lib.rs`'s
//! bin+lib split.
#![no_std]
#![cfg_attr(not(test), no_main)]
#![feature(abi_x86_interrupt)]
#![feature(naked_functions)]
#![feature(alloc_error_handler)]

extern crate alloc;

pub mod arch;
pub mod boot_info;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fault;
pub mod fs;
pub mod log_service;
pub mod mm;
pub mod sched;
pub mod serial;
pub mod syscall;

#[cfg(feature = "testing")]
pub mod testing;

use boot_info::BootInfo;

/// The shared boot sequence both architectures' `_start` call into,
/// after the loader hands off a `BootInfo` pointer. Order matches
/// spec.md §2's data-flow description: C2 before C3 (the bitmap must be
/// placed before the identity map replaces the firmware's own tables),
/// C3 before C4 (the heap needs a mapped region to bump-allocate from),
/// arch interrupt/timer bring-up before any task exists, then the idle
/// task, then the scheduler itself — interrupts stay masked until a
/// task is ready to run.
pub fn kernel_main(boot_info: &'static BootInfo) -> ! {
    log_service::init();
    fault::set_framebuffer(boot_info);

    log::info!("sylphia-os kernel starting (git {})", env!("GIT_HASH"));

    // SAFETY: called exactly once, before any frame is allocated, while
    // the firmware's own identity-style mapping is still active.
    let highest = unsafe { mm::frame_allocator::init(boot_info) }
        .expect("C2: physical memory manager init must succeed");
    log::info!(
        "C2: {} MiB RAM tracked, {} MiB free",
        highest / (1024 * 1024),
        mm::frame_allocator::free_bytes() / (1024 * 1024)
    );

    // SAFETY: C2 is initialized; this is the only call to
    // `init_identity`, made once during single-threaded boot.
    unsafe { mm::vmm::init_identity(boot_info) }.expect("C3: virtual memory manager init must succeed");
    log::info!("C3: identity map installed");

    let heap_start_frame = mm::frame_allocator::alloc_pages(1).expect("C4: reserve first heap frame");
    let heap_start = core::ptr::NonNull::new((heap_start_frame * mm::PAGE_SIZE) as *mut u8)
        .expect("frame address is never null");
    mm::heap::init(heap_start);
    log::info!("C4: heap initialized");

    arch::init();
    log::info!("C5/C6: interrupts and timer initialized");

    sched::scheduler::init_idle().expect("C7/C8: idle task must be creatable");
    log::info!("C8: idle task registered");

    #[cfg(target_arch = "x86_64")]
    {
        if let Some(device) = drivers::pci::find_nvme_controller() {
            match drivers::nvme::NvmeController::init(&device) {
                Ok(ctrl) => log::info!(
                    "C10: NVMe controller online, {} MiB",
                    ctrl.max_lba * ctrl.lba_size as u64 / (1024 * 1024)
                ),
                Err(e) => log::warn!("C10: NVMe controller init failed: {}", e),
            }
        } else {
            log::warn!("C10: no NVMe controller found on bus 0");
        }
    }

    log::info!("boot complete, entering scheduler");
    arch::enable_interrupts();
    sched::scheduler::start();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    let message = info
        .message()
        .as_str()
        .unwrap_or("kernel panicked (formatted message, see location)");
    log::error!("panic: {} at {:?}", message, info.location());
    fault::kernel_fatal(&fault::ExceptionContext {
        name: "panic",
        rip: 0,
        error_code: 0,
    });
}
