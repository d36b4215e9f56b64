//! GS-relative per-CPU data used by `syscall_entry` to stash the user
//! stack and switch to a per-task kernel stack. Grounded on
//! `doublegate-VeridianOS/kernel/src/arch/x86_64/usermode.rs`'s
//! `PerCpuData`/`per_cpu_data_ptr` pattern, collapsed to a single static
//! instance — this kernel has no SMP support (spec.md §9 Non-goals).

use x86_64::registers::model_specific::KernelGsBase;
use x86_64::VirtAddr;

/// Field order is load-bearing: `syscall_entry` addresses these by raw
/// `gs:[0x0]` / `gs:[0x8]` offsets, not through this type.
#[repr(C)]
struct PerCpuData {
    kernel_rsp: u64,
    user_rsp_scratch: u64,
}

static mut PER_CPU: PerCpuData = PerCpuData {
    kernel_rsp: 0,
    user_rsp_scratch: 0,
};

/// Point `KERNEL_GS_BASE` at the per-CPU block so the first `swapgs` in
/// `syscall_entry` (executed on every SYSCALL) makes `gs:` addressing
/// resolve into it.
pub fn init() {
    let ptr = &raw mut PER_CPU as u64;
    KernelGsBase::write(VirtAddr::new(ptr));
}

/// Set the kernel stack top `syscall_entry` switches onto, mirroring
/// whatever `gdt::set_kernel_stack` just installed into TSS.RSP0 — both
/// back the same "stack used for ring 3 -> ring 0 transitions" concept,
/// one for IDT-vectored traps, one for SYSCALL.
pub fn set_kernel_rsp(stack_top: u64) {
    // SAFETY: called with interrupts disabled from the scheduler, no
    // concurrent access; this kernel is single-CPU.
    unsafe { (&raw mut PER_CPU).cast::<u64>().write(stack_top) };
}
