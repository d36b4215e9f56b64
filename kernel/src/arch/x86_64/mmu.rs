//! x86-64 MMU root register (CR3) access, used by `mm::vmm`.

use core::arch::asm;

use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;
use x86_64::PhysAddr as X86PhysAddr;

use crate::mm::PhysAddr;

pub fn current_root() -> PhysAddr {
    let (frame, _) = Cr3::read();
    PhysAddr::new(frame.start_address().as_u64())
}

/// Current RSP, used by `mm::vmm::init_identity` so the identity map
/// covers the stack the bootstrap code is already running on.
pub fn current_stack_pointer() -> u64 {
    let rsp: u64;
    // SAFETY: reading RSP has no side effects.
    unsafe { asm!("mov {0}, rsp", out(reg) rsp) };
    rsp
}

/// Current RIP (approximated via the return address of this call),
/// used by `mm::vmm::init_identity` so the identity map covers the code
/// the bootstrap code is already executing.
pub fn current_instruction_pointer() -> u64 {
    let rip: u64;
    // SAFETY: reads the return address pushed by `call`; no side effects.
    unsafe { asm!("lea {0}, [rip]", out(reg) rip) };
    rip
}

/// Load a new top-level table root. Per spec.md §4.2, bulk changes (a
/// fresh address space swap) are followed by a reload of the top-level
/// pointer rather than per-page invalidation.
///
/// # Safety
/// `root` must point at a fully-populated, correctly-structured PML4;
/// loading a bogus root is immediate undefined behavior.
pub unsafe fn set_root(root: PhysAddr) {
    let frame = PhysFrame::containing_address(X86PhysAddr::new(root.as_u64()));
    // SAFETY: delegated to the caller's contract above.
    unsafe { Cr3::write(frame, Cr3Flags::empty()) };
}
