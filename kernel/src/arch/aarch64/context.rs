//! C7 — the AArch64 `switch_context` primitive. Mirrors
//! `arch::x86_64::context`'s `RegisterFrame`/`switch_context` contract
//! (full register save into `*from`, branch-over-save when
//! `from == null`, uniform resume via `eret`) but saves the AArch64
//! callee-saved set plus SPSR_EL1/ELR_EL1/SP_EL0/TTBR0_EL1, per
//! `original_source/kernel/src/task/scheduler.cpp`'s architecture-
//! independent task-switch contract.

use core::arch::naked_asm;
use core::mem::offset_of;

/// Saved execution state of one AArch64 task. Field order is load-bearing
/// — every offset used by `switch_context` is derived via `offset_of!`.
#[repr(C, align(16))]
pub struct RegisterFrame {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub x29: u64, // frame pointer
    pub x30: u64, // link register / entry point on first dispatch
    pub sp: u64,
    pub sp_el0: u64,
    pub elr_el1: u64,
    pub spsr_el1: u64,
    pub ttbr0_el1: u64,
}

/// SPSR_EL1 value for returning to EL1h with interrupts unmasked.
const SPSR_EL1H_IRQ_ENABLED: u64 = 0b0101;
/// SPSR_EL1 value for returning to EL0t with interrupts unmasked.
const SPSR_EL0T_IRQ_ENABLED: u64 = 0b0000;

impl RegisterFrame {
    pub fn new_kernel(entry: u64, stack_top: u64, ttbr0: u64) -> Self {
        let mut frame = Self::zeroed();
        frame.elr_el1 = entry;
        frame.sp = stack_top;
        frame.spsr_el1 = SPSR_EL1H_IRQ_ENABLED;
        frame.ttbr0_el1 = ttbr0;
        frame
    }

    pub fn new_user(entry: u64, user_stack_top: u64, ttbr0: u64) -> Self {
        let mut frame = Self::zeroed();
        frame.elr_el1 = entry;
        frame.sp_el0 = user_stack_top;
        frame.spsr_el1 = SPSR_EL0T_IRQ_ENABLED;
        frame.ttbr0_el1 = ttbr0;
        frame
    }

    fn zeroed() -> Self {
        // SAFETY: every field is a plain integer; the all-zero pattern
        // is a valid (if meaningless until seeded) bit pattern.
        unsafe { core::mem::zeroed() }
    }
}

/// Save `*from` and resume `*to`, following `arch::x86_64::context`'s
/// exact branch-over-save contract for `from == null`.
///
/// # Safety
/// `to` must point at a fully-initialized `RegisterFrame` whose `sp`
/// (or `sp_el0`, for a user target) lies within a live stack and whose
/// `ttbr0_el1` names a valid address-space root.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(from: *mut RegisterFrame, to: *const RegisterFrame) {
    naked_asm!(
        // x0 = from, x1 = to (AAPCS64).
        "cbz x0, 2f",

        "mov x9, sp",
        "stp x19, x20, [x0, #{x19}]",
        "stp x21, x22, [x0, #{x21}]",
        "stp x23, x24, [x0, #{x23}]",
        "stp x25, x26, [x0, #{x25}]",
        "stp x27, x28, [x0, #{x27}]",
        "stp x29, x30, [x0, #{x29}]",
        "str x9,  [x0, #{sp}]",
        "mrs x9, sp_el0",
        "str x9, [x0, #{sp_el0}]",
        // x30 holds the return address of the `bl` that entered this
        // function (there is no prologue to clobber it yet) — exactly
        // the resume point a later `switch_context(_, from)` should
        // restore, mirroring how the x86-64 side peeks its return
        // address off the stack.
        "str x30, [x0, #{elr_el1}]",
        "mrs x9, spsr_el1",
        "str x9, [x0, #{spsr_el1}]",
        "mrs x9, ttbr0_el1",
        "str x9, [x0, #{ttbr0_el1}]",

        "2:",
        "ldr x9, [x1, #{ttbr0_el1}]",
        "mrs x10, ttbr0_el1",
        "cmp x9, x10",
        "b.eq 3f",
        "msr ttbr0_el1, x9",
        "isb",
        "3:",
        "ldp x19, x20, [x1, #{x19}]",
        "ldp x21, x22, [x1, #{x21}]",
        "ldp x23, x24, [x1, #{x23}]",
        "ldp x25, x26, [x1, #{x25}]",
        "ldp x27, x28, [x1, #{x27}]",
        "ldp x29, x30, [x1, #{x29}]",
        "ldr x9, [x1, #{sp}]",
        "mov sp, x9",
        "ldr x9, [x1, #{sp_el0}]",
        "msr sp_el0, x9",
        "ldr x9, [x1, #{elr_el1}]",
        "msr elr_el1, x9",
        "ldr x9, [x1, #{spsr_el1}]",
        "msr spsr_el1, x9",
        "eret",

        x19 = const offset_of!(RegisterFrame, x19),
        x21 = const offset_of!(RegisterFrame, x21),
        x23 = const offset_of!(RegisterFrame, x23),
        x25 = const offset_of!(RegisterFrame, x25),
        x27 = const offset_of!(RegisterFrame, x27),
        x29 = const offset_of!(RegisterFrame, x29),
        sp = const offset_of!(RegisterFrame, sp),
        sp_el0 = const offset_of!(RegisterFrame, sp_el0),
        elr_el1 = const offset_of!(RegisterFrame, elr_el1),
        spsr_el1 = const offset_of!(RegisterFrame, spsr_el1),
        ttbr0_el1 = const offset_of!(RegisterFrame, ttbr0_el1),
    );
}
