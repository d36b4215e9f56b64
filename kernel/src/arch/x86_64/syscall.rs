//! C9 — x86-64 syscall entry (SYSCALL/SYSRET), grounded on
//! `doublegate-VeridianOS/kernel/src/arch/x86_64/syscall.rs`: a naked
//! `syscall_entry` that swaps to the kernel GS base, swaps in the
//! current task's kernel stack, saves the caller-clobbered registers,
//! fixes up the ABI's r10-instead-of-rcx 4th argument, and calls into
//! `crate::syscall::dispatch`.

use core::arch::naked_asm;

use x86_64::registers::model_specific::{Efer, EferFlags, LStar, Star};

use super::gdt;

#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    naked_asm!(
        "swapgs",
        "mov gs:[0x8], rsp", // stash the user RSP in per-CPU data
        "mov rsp, gs:[0x0]", // switch onto the current task's kernel stack
        "push rcx", // user RIP, saved by SYSCALL
        "push r11", // user RFLAGS, saved by SYSCALL
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // SYSCALL ABI: rax=nr, rdi=arg0, rsi=arg1, rdx=arg2, r10=arg3
        // (r10 stands in for rcx, clobbered by SYSCALL itself). Shuffle
        // into System V order for `dispatch(nr, arg0, arg1, arg2, arg3)`
        // — each move reads its source before a later move overwrites it.
        "mov r8, r10",
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",

        "call {handler}",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r11",
        "pop rcx",
        "mov rsp, gs:[0x8]", // restore the user RSP stashed on entry
        "swapgs",
        "sysretq",

        handler = sym crate::syscall::dispatch,
    );
}

pub fn init() {
    // SAFETY: enabling SYSCALL/SYSRET is required before LSTAR/STAR are
    // meaningful; this runs once during single-threaded C9 bring-up.
    unsafe {
        Efer::update(|flags| *flags |= EferFlags::SYSTEM_CALL_EXTENSIONS);
        LStar::write(x86_64::VirtAddr::new(syscall_entry as u64));
        Star::write(
            gdt::selectors().user_code_selector,
            gdt::selectors().user_data_selector,
            gdt::selectors().code_selector,
            gdt::selectors().data_selector,
        )
        .expect("STAR selector layout must satisfy SYSCALL/SYSRET's +8/+16 convention");
    }
}
