//! C5 — AArch64 exception vector table. Grounded on
//! `doublegate-VeridianOS/kernel/src/arch/aarch64/exceptions.rs` (the
//! 16-entry EL1 vector table laid out in 0x80-byte slots per the
//! AArch64 exception model) and `original_source/kernel/src/idt.cpp`'s
//! user-vs-kernel fault split, carried over from `arch::x86_64::idt`.

use core::arch::asm;

use crate::fault::{self, ExceptionContext};

use super::gic;

/// Bit 0 of SPSR_EL1's saved mode field distinguishes EL0 (user) from
/// EL1 (kernel) at the time of the trap.
fn is_user_mode(spsr_el1: u64) -> bool {
    spsr_el1 & 0b1111 == 0
}

pub fn init() {
    extern "C" {
        static vector_table_el1: u8;
    }
    // SAFETY: `vector_table_el1` is a naked symbol defined below, 2KiB
    // aligned as VBAR_EL1 requires.
    unsafe {
        let base = &vector_table_el1 as *const u8 as u64;
        asm!("msr vbar_el1, {0}", "isb", in(reg) base);
    }
}

/// The SVC argument registers as the vector stub leaves them on the
/// stack — see the `stp` sequence in `sync_stub` below. Addressed by a
/// raw pointer rather than passed as five more call arguments, mirroring
/// the split-borrow pattern `sched::scheduler` uses for its register
/// frames.
#[repr(C)]
struct SyscallFrame {
    x4: u64,
    _lr: u64,
    x2: u64,
    x3: u64,
    x0: u64,
    x1: u64,
}

/// Dispatches a synchronous exception taken from EL1 or EL0. Called by
/// the naked vector stubs with ESR_EL1/ELR_EL1/SPSR_EL1 already read.
#[no_mangle]
extern "C" fn handle_sync_exception(esr_el1: u64, elr_el1: u64, spsr_el1: u64, frame: *mut u64) {
    let ec = (esr_el1 >> 26) & 0x3F;
    let name = match ec {
        0b100100 | 0b100101 => "data_abort",
        0b100000 | 0b100001 => "instruction_abort",
        0b010101 => "svc",
        0b000000 => "unknown",
        _ => "synchronous",
    };

    if ec == 0b010101 {
        // SAFETY: `frame` points at the six saved registers `sync_stub`
        // just pushed, still live on the exception stack.
        let frame = unsafe { &mut *(frame as *mut SyscallFrame) };
        let result = crate::syscall::dispatch(frame.x0, frame.x1, frame.x2, frame.x3, frame.x4);
        frame.x0 = result;
        return;
    }

    let ctx = ExceptionContext {
        name,
        rip: elr_el1,
        error_code: esr_el1,
    };

    if is_user_mode(spsr_el1) {
        log::warn!("user fault: {} at {:#018x}, esr={:#010x}", name, elr_el1, esr_el1);
        crate::sched::scheduler::terminate_current_and_reschedule();
    } else {
        fault::kernel_fatal(&ctx);
    }
}

/// Dispatches an IRQ taken from EL1 or EL0.
#[no_mangle]
extern "C" fn handle_irq() {
    if let Some(irq) = gic::ack() {
        if irq == gic::TIMER_PPI {
            crate::arch::aarch64::timer::on_tick();
        }
        gic::send_eoi(irq);
    }
}

core::arch::global_asm!(
    r#"
.section .text
.global vector_table_el1
.align 11
vector_table_el1:
    // Current EL with SP0 (unused, this kernel always runs on SP_EL1).
    .align 7
    b .
    .align 7
    b .
    .align 7
    b .
    .align 7
    b .

    // Current EL with SPx — the normal kernel-trap path.
    .align 7
    b sync_stub
    .align 7
    b irq_stub
    .align 7
    b .
    .align 7
    b .

    // Lower EL using AArch64 — traps from user tasks.
    .align 7
    b sync_stub
    .align 7
    b irq_stub
    .align 7
    b .
    .align 7
    b .

    // Lower EL using AArch32 — unsupported.
    .align 7
    b .
    .align 7
    b .
    .align 7
    b .
    .align 7
    b .

sync_stub:
    // SVC argument/return registers (x0=nr/ret, x1..x4=args) and LR,
    // pushed in reverse so [sp] addresses the `SyscallFrame` struct
    // `handle_sync_exception` overlays on this memory.
    stp x0, x1, [sp, #-16]!
    stp x2, x3, [sp, #-16]!
    stp x4, x30, [sp, #-16]!
    mrs x9, esr_el1
    mrs x10, elr_el1
    mrs x11, spsr_el1
    mov x0, x9
    mov x1, x10
    mov x2, x11
    mov x3, sp
    bl handle_sync_exception
    ldp x4, x30, [sp], #16
    ldp x2, x3, [sp], #16
    ldp x0, x1, [sp], #16
    eret

irq_stub:
    stp x0, x1, [sp, #-16]!
    bl handle_irq
    ldp x0, x1, [sp], #16
    eret
"#
);
