//! C7 — the task control block. Grounded on
//! `doublegate-VeridianOS/kernel/src/sched/task.rs`'s `Task`/`TaskState`
//! shape, trimmed of the teacher's priority/SMP-affinity/CFS-vruntime
//! fields — this core has one FIFO ready queue and no priorities.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::context::RegisterFrame;
use crate::fs::fd;
use crate::mm::{vmm, PhysAddr, VirtAddr};

/// Fixed kernel stack size per spec.md §4.6.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
/// Fixed user stack size and virtual placement per spec.md §4.6.
pub const USER_STACK_SIZE: usize = 64 * 1024;
pub const USER_STACK_TOP: u64 = 0x0000_7000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub struct TaskMeta {
    pub name: &'static str,
    pub is_user: bool,
}

/// Describes a task's user-mode stack, present only for `is_user` tasks.
pub struct UserStack {
    pub base: VirtAddr,
    pub size: usize,
}

pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub frame: RegisterFrame,
    /// Owns the kernel stack's backing storage; never read directly once
    /// `frame` is seeded, kept alive only so it is freed with the task.
    kernel_stack: Box<[u8]>,
    /// Top of `kernel_stack`, installed as TSS.RSP0 (x86-64) whenever this
    /// task is dispatched, so ring 3 -> ring 0 transitions land on a
    /// stack this task owns rather than whichever task ran last.
    pub kernel_stack_top: u64,
    pub address_space: PhysAddr,
    pub owns_address_space: bool,
    pub user_stack: Option<UserStack>,
    pub meta: TaskMeta,
}

impl Task {
    /// Allocate a TCB and kernel stack, and seed `frame` so that a future
    /// `switch_context(_, frame)` resumes at `entry` with interrupts
    /// enabled, per spec.md §4.6.
    pub fn create(name: &'static str, entry: u64, is_user: bool) -> crate::error::KernelResult<Self> {
        Self::create_in(name, entry, is_user, None)
    }

    /// As `create`, but for a user task whose address space was already
    /// built by the caller (e.g. `elf::load`, which needs somewhere to
    /// map segments into before a `Task` exists to own it). `Task` takes
    /// ownership — `address_space` is torn down when this task is.
    pub fn create_in_address_space(
        name: &'static str,
        entry: u64,
        address_space: PhysAddr,
    ) -> crate::error::KernelResult<Self> {
        Self::create_in(name, entry, true, Some(address_space))
    }

    fn create_in(
        name: &'static str,
        entry: u64,
        is_user: bool,
        address_space_override: Option<PhysAddr>,
    ) -> crate::error::KernelResult<Self> {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
        let kernel_stack_top = kernel_stack.as_mut_ptr() as u64 + KERNEL_STACK_SIZE as u64;

        let (address_space, owns_address_space) = if let Some(space) = address_space_override {
            (space, true)
        } else if is_user {
            (vmm::create_address_space()?, true)
        } else {
            (vmm::kernel_root(), false)
        };

        let (frame, user_stack) = if is_user {
            let user_stack_base = VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE as u64);
            let pages = USER_STACK_SIZE / crate::mm::PAGE_SIZE;
            let mut remaining = pages;
            let mut phys_pages = alloc::vec::Vec::with_capacity(pages);
            while remaining > 0 {
                let frame_id = crate::mm::frame_allocator::alloc_pages(1).ok_or(
                    crate::error::KernelError::OutOfMemory {
                        requested: crate::mm::PAGE_SIZE,
                        available: crate::mm::frame_allocator::free_bytes(),
                    },
                )?;
                phys_pages.push(frame_id);
                remaining -= 1;
            }
            for (i, frame_id) in phys_pages.iter().enumerate() {
                let virt = VirtAddr::new(user_stack_base.as_u64() + (i * crate::mm::PAGE_SIZE) as u64);
                let phys = PhysAddr::new((*frame_id * crate::mm::PAGE_SIZE) as u64);
                vmm::map(
                    address_space,
                    virt,
                    phys,
                    1,
                    crate::mm::PageFlags::PRESENT
                        | crate::mm::PageFlags::WRITABLE
                        | crate::mm::PageFlags::USER
                        | crate::mm::PageFlags::NO_EXECUTE,
                )?;
            }
            let user_stack_top = USER_STACK_TOP;
            (
                RegisterFrame::new_user(entry, user_stack_top, address_space.as_u64()),
                Some(UserStack {
                    base: user_stack_base,
                    size: USER_STACK_SIZE,
                }),
            )
        } else {
            (
                RegisterFrame::new_kernel(entry, kernel_stack_top, address_space.as_u64()),
                None,
            )
        };

        fd::init_task_fds(id.0);

        Ok(Self {
            id,
            state: TaskState::Ready,
            frame,
            kernel_stack,
            kernel_stack_top,
            address_space,
            owns_address_space,
            user_stack,
            meta: TaskMeta { name, is_user },
        })
    }
}
