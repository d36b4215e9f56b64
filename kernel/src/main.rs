//! Binary entry point. The UEFI loader (`boot/`) chainloads this ELF
//! and jumps directly to its entry symbol with a `BootInfo*` in the
//! first argument register (`rdi` on x86-64, `x0` on AArch64 — `extern
//! "C"` resolves to the right register on both), per spec.md §6.
#![no_std]
#![no_main]

use sylphia_kernel::boot_info::BootInfo;

#[no_mangle]
pub extern "C" fn _start(boot_info: *const BootInfo) -> ! {
    // SAFETY: the loader contract (spec.md §6) guarantees this pointer
    // is valid and the structure it addresses outlives the kernel.
    let boot_info: &'static BootInfo = unsafe { &*boot_info };
    sylphia_kernel::kernel_main(boot_info)
}
