//! FIFO round-robin behavior (spec.md §4.7, scenario-style coverage of
//! §8's scheduler scenarios): three kernel tasks spawned in order A, B,
//! C must run in that order, rotate back to the front on `yield_now`,
//! and a task that terminates mid-rotation must not be dispatched
//! again. Grounded on `doublegate-VeridianOS`'s own harness-less
//! `tests/` binaries — each such binary runs exactly once, since
//! `scheduler::start()` never returns to its caller, so this exercises
//! one scenario per binary rather than a `#[test]`-per-case table.
#![no_std]
#![no_main]

extern crate alloc;

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;
use spin::Mutex;

use sylphia_kernel::boot_info::{BootInfo, MemoryDescriptor, EFI_CONVENTIONAL_MEMORY};
use sylphia_kernel::sched::scheduler;
use sylphia_kernel::testing::{exit_qemu, QemuExitCode};
use sylphia_kernel::mm;

const RAM_BYTES: u64 = 64 * 1024 * 1024;

static mut RAM_DESCRIPTOR: MemoryDescriptor = MemoryDescriptor {
    ty: EFI_CONVENTIONAL_MEMORY,
    _pad: 0,
    physical_start: 0,
    virtual_start: 0,
    num_pages: RAM_BYTES / mm::PAGE_SIZE as u64,
    attribute: 0,
};

/// Number of tasks still live; the task that drives this to zero is the
/// only one allowed to check `ORDER` and exit the test binary.
static ALIVE: AtomicUsize = AtomicUsize::new(3);

static ORDER: Mutex<Vec<char>> = Mutex::new(Vec::new());

fn record(label: char) {
    ORDER.lock().push(label);
}

/// Either hand off to the next READY task (this task is not the last
/// one standing) or, if it is, verify the full interleaving and end the
/// run. Mirrors the real exit syscall's `terminate_current_and_reschedule`
/// call site in `syscall::sys_exit`.
fn finish_or_check() -> ! {
    if ALIVE.fetch_sub(1, Ordering::SeqCst) == 1 {
        let order = ORDER.lock();
        let expected: &[char] = &['A', 'B', 'C', 'A', 'B'];
        assert_eq!(order.as_slice(), expected, "FIFO rotation must run in spawn order and resume where each task yielded");
        drop(order);
        exit_qemu(QemuExitCode::Success);
    }
    scheduler::terminate_current_and_reschedule();
}

fn task_a() -> ! {
    record('A');
    scheduler::yield_now();
    record('A');
    finish_or_check();
}

fn task_b() -> ! {
    record('B');
    scheduler::yield_now();
    record('B');
    finish_or_check();
}

fn task_c() -> ! {
    record('C');
    finish_or_check();
}

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

    let heap_frame = mm::frame_allocator::alloc_pages(1).expect("reserve heap start frame");
    let heap_start = core::ptr::NonNull::new((heap_frame * mm::PAGE_SIZE) as *mut u8).unwrap();
    mm::heap::init(heap_start);

    scheduler::spawn("task_a", task_a as u64, false).expect("spawn task_a");
    scheduler::spawn("task_b", task_b as u64, false).expect("spawn task_b");
    scheduler::spawn("task_c", task_c as u64, false).expect("spawn task_c");

    scheduler::start();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    sylphia_kernel::serial_println!("scheduler_tests failed: {}", info);
    exit_qemu(QemuExitCode::Failed);
}
