//! C1 — architecture layer. Everything that differs between x86-64 and
//! AArch64 is isolated here; the rest of the kernel calls through the
//! re-exports below and never matches on `target_arch` itself (apart from
//! the handful of MMIO addresses that are genuinely per-board, e.g. the
//! serial port).

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64 as imp;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64 as imp;

pub use imp::{context, mmu};

/// Architecture bring-up: GDT/segmentation (x86 only), IDT/GIC, and the
/// timer source, in that order. Interrupts remain disabled on return;
/// the caller (kernel entry) unmasks them once C7/C8 have a task to
/// dispatch into.
pub fn init() {
    imp::init();
}

pub fn enable_interrupts() {
    imp::enable_interrupts();
}

pub fn disable_interrupts() {
    imp::disable_interrupts();
}

/// Run `f` with interrupts disabled, restoring the prior interrupt state
/// on exit. This is the kernel's only critical-section primitive — ready
/// queue, PMM bitmap, and interrupt-controller register mutation all go
/// through it, per spec.md §5.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    imp::without_interrupts(f)
}

/// Architecture's lowest-power "wait for interrupt". Used by the idle
/// task body and by the fatal-panic halt loop.
pub fn halt() -> ! {
    loop {
        imp::halt_once();
    }
}

/// Install `stack_top` as the stack the next ring 3 -> ring 0 (or
/// EL0 -> EL1) transition resumes on. Called by the scheduler on every
/// dispatch, per spec.md §4.6/§4.8, so each task's traps and syscalls
/// land on a stack it owns rather than whatever task ran last.
pub fn set_kernel_stack(stack_top: u64) {
    imp::set_kernel_stack(stack_top);
}
