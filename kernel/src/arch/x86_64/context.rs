//! C7 — the x86-64 `switch_context` primitive.
//!
//! Grounded primarily on `original_source/kernel/src/task/scheduler.cpp`'s
//! `switch_context`: a hand-written AT&T-syntax routine that saves the
//! full register file (including CR3 and the FXSAVE area) into `*from`,
//! restores the same from `*to`, and resumes via `iretq` off a manually
//! constructed interrupt-return frame — which works uniformly whether
//! the target is a kernel task (ring 0) or a user task (ring 3), and
//! which the C++ source branches around entirely when `from == nullptr`
//! (the very first dispatch). The Rust version keeps that exact shape,
//! translated to Intel-syntax `naked_asm!` per
//! `doublegate-VeridianOS/kernel/src/arch/x86_64/context.rs`'s general
//! idiom (explicit field-offset addressing rather than a struct passed
//! by value), using `core::mem::offset_of!` instead of hand-computed
//! byte offsets so the assembly can never silently drift from the
//! `RegisterFrame` layout.

use core::arch::naked_asm;
use core::mem::offset_of;

/// The full saved execution state of one task. Field order is load-bearing
/// — every offset referenced from `switch_context`'s assembly is derived
/// from this type via `offset_of!`, not hand-counted.
#[repr(C, align(16))]
pub struct RegisterFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub cr3: u64,
    _pad: u64,
    pub fxsave: [u8; 512],
}

/// x86-64 ring-0 code/data selectors (see `gdt.rs`).
const KERNEL_CS: u64 = 0x08;
const KERNEL_SS: u64 = 0x10;
/// Ring-3 selectors, RPL 3 baked in (see `gdt.rs` layout comment).
const USER_CS: u64 = 0x33;
const USER_SS: u64 = 0x2B;

impl RegisterFrame {
    /// Seed a frame so that a future `switch_context(_, this)` behaves as
    /// if a function had just returned into `entry`, per spec.md §4.6.
    pub fn new_kernel(entry: u64, stack_top: u64, cr3: u64) -> Self {
        let mut frame = Self::zeroed();
        frame.rip = entry;
        frame.rsp = stack_top;
        frame.rflags = 0x202; // IF=1, reserved bit 1 always set
        frame.cs = KERNEL_CS;
        frame.ss = KERNEL_SS;
        frame.ds = KERNEL_SS;
        frame.es = KERNEL_SS;
        frame.cr3 = cr3;
        frame
    }

    /// As `new_kernel`, but arranged for the first dispatch into ring 3:
    /// `rip=entry`, `rsp=user_stack_top`, user selectors.
    pub fn new_user(entry: u64, user_stack_top: u64, cr3: u64) -> Self {
        let mut frame = Self::zeroed();
        frame.rip = entry;
        frame.rsp = user_stack_top;
        frame.rflags = 0x202;
        frame.cs = USER_CS;
        frame.ss = USER_SS;
        frame.ds = USER_SS;
        frame.es = USER_SS;
        frame.cr3 = cr3;
        frame
    }

    fn zeroed() -> Self {
        // SAFETY: an all-zero bit pattern is valid for every field of
        // `RegisterFrame` (plain integers and a byte array).
        unsafe { core::mem::zeroed() }
    }
}

/// Save `*from`'s full register state (general registers, flags, segment
/// selectors, CR3, FXSAVE area) and load the same from `*to`, resuming
/// execution at `to.rip`. Safe to call with `from == core::ptr::null_mut()`
/// — the save half is branched over entirely, per spec.md §4.6.
///
/// # Safety
/// `to` must point at a fully-initialized `RegisterFrame` whose `rsp`
/// lies within a live kernel (or user) stack and whose `cr3` names a
/// valid address-space root. `from`, if non-null, must be writable.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(from: *mut RegisterFrame, to: *const RegisterFrame) {
    naked_asm!(
        // rdi = from, rsi = to (System V AMD64 ABI).
        "test rdi, rdi",
        "jz 2f",

        // --- save *from ---
        "mov [rdi + {r15}], r15",
        "mov [rdi + {r14}], r14",
        "mov [rdi + {r13}], r13",
        "mov [rdi + {r12}], r12",
        "mov [rdi + {r11}], r11",
        "mov [rdi + {r10}], r10",
        "mov [rdi + {r9}],  r9",
        "mov [rdi + {r8}],  r8",
        "mov [rdi + {rbp}], rbp",
        "mov [rdi + {rdx}], rdx",
        "mov [rdi + {rcx}], rcx",
        "mov [rdi + {rbx}], rbx",
        "mov [rdi + {rax}], rax",
        // Save RSP as it will be immediately after this routine's own
        // `ret` pops the return address `call` just pushed — not the
        // raw entry-time RSP, which still points at that word and would
        // leave every future resume one word short of where the caller
        // actually expects to land (`iretq` doesn't pop it the way a
        // plain `ret` would).
        "lea rax, [rsp + 8]",
        "mov [rdi + {rsp}], rax",
        "mov rax, [rsp]",
        "mov [rdi + {rip}], rax",
        "mov rax, cr3",
        "mov [rdi + {cr3}], rax",
        "pushfq",
        "pop rax",
        "mov [rdi + {rflags}], rax",
        "mov [rdi + {rsi}], rsi",
        "mov [rdi + {rdi}], rdi",
        "fxsave [rdi + {fxsave}]",

        "2:",
        // --- restore *to, rsi is preserved across the block above ---
        "mov rax, [rsi + {cr3}]",
        "mov rcx, cr3",
        "cmp rax, rcx",
        "je 3f",
        "mov cr3, rax",
        "3:",
        "fxrstor [rsi + {fxsave}]",
        "mov r15, [rsi + {r15}]",
        "mov r14, [rsi + {r14}]",
        "mov r13, [rsi + {r13}]",
        "mov r12, [rsi + {r12}]",
        "mov r11, [rsi + {r11}]",
        "mov r10, [rsi + {r10}]",
        "mov r9,  [rsi + {r9}]",
        "mov r8,  [rsi + {r8}]",
        "mov rbp, [rsi + {rbp}]",
        "mov rdx, [rsi + {rdx}]",
        "mov rcx, [rsi + {rcx}]",
        "mov rbx, [rsi + {rbx}]",
        "mov rax, [rsi + {rflags}]",
        "push rax",
        "popfq",

        // Build an iretq frame: SS, RSP, RFLAGS, CS, RIP (pushed in
        // reverse order), so the same path resumes both kernel and user
        // targets uniformly regardless of privilege level.
        "mov rax, [rsi + {ss}]",
        "push rax",
        "mov rax, [rsi + {rsp}]",
        "push rax",
        "mov rax, [rsi + {rflags}]",
        "push rax",
        "mov rax, [rsi + {cs}]",
        "push rax",
        "mov rax, [rsi + {rip}]",
        "push rax",

        "mov rdi, [rsi + {rdi}]",
        "mov rax, [rsi + {rax}]",
        "mov rsi, [rsi + {rsi}]",
        "iretq",

        r15 = const offset_of!(RegisterFrame, r15),
        r14 = const offset_of!(RegisterFrame, r14),
        r13 = const offset_of!(RegisterFrame, r13),
        r12 = const offset_of!(RegisterFrame, r12),
        r11 = const offset_of!(RegisterFrame, r11),
        r10 = const offset_of!(RegisterFrame, r10),
        r9 = const offset_of!(RegisterFrame, r9),
        r8 = const offset_of!(RegisterFrame, r8),
        rbp = const offset_of!(RegisterFrame, rbp),
        rdi = const offset_of!(RegisterFrame, rdi),
        rsi = const offset_of!(RegisterFrame, rsi),
        rdx = const offset_of!(RegisterFrame, rdx),
        rcx = const offset_of!(RegisterFrame, rcx),
        rbx = const offset_of!(RegisterFrame, rbx),
        rax = const offset_of!(RegisterFrame, rax),
        rsp = const offset_of!(RegisterFrame, rsp),
        rip = const offset_of!(RegisterFrame, rip),
        rflags = const offset_of!(RegisterFrame, rflags),
        cs = const offset_of!(RegisterFrame, cs),
        ss = const offset_of!(RegisterFrame, ss),
        cr3 = const offset_of!(RegisterFrame, cr3),
        fxsave = const offset_of!(RegisterFrame, fxsave),
    );
}
