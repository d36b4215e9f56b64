//! C8 — strict-FIFO round-robin scheduler. Grounded on
//! `doublegate-VeridianOS/kernel/src/sched/scheduler.rs`'s global
//! `Mutex<Scheduler>` singleton and current-task tracking, trimmed of
//! the teacher's SMP per-CPU run queues, CFS vruntime accounting, and
//! priority classes — spec.md §4.7 names exactly four operations
//! (`add_ready`, `on_tick`, `yield`, `start`) over one FIFO queue.
//!
//! The scheduler owns every `Task` (`alloc::collections::BTreeMap`
//! keyed by `TaskId`); callers never hold a `Task` reference across a
//! context switch — only a `TaskId` — matching spec.md §9's "cyclic
//! ownership" resolution ("tasks hold only their `task_id`, and obtain
//! a borrow of the TCB via the scheduler when necessary").

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::arch::context::{switch_context, RegisterFrame};
use crate::arch::{self, without_interrupts};
use crate::error::{KernelError, KernelResult};
use crate::mm::vmm;

use super::queue::ReadyQueue;
use super::task::{Task, TaskId, TaskState};

struct Inner {
    tasks: BTreeMap<TaskId, Box<Task>>,
    ready: ReadyQueue,
    current: Option<TaskId>,
    started: bool,
}

static SCHEDULER: Mutex<Inner> = Mutex::new(Inner {
    tasks: BTreeMap::new(),
    ready: ReadyQueue::new(),
    current: None,
    started: false,
});

fn idle_entry() -> ! {
    arch::enable_interrupts();
    arch::halt()
}

/// Construct the mandatory idle task and register it, per spec.md
/// §4.7. Must run once, before `start()`.
pub fn init_idle() -> KernelResult<()> {
    let task = Task::create("idle", idle_entry as u64, false)?;
    add_ready(task);
    Ok(())
}

/// Allocate a TCB via `Task::create` and make it READY, per spec.md
/// §4.6/§4.7's `create_task`/`add_ready` pair.
pub fn spawn(name: &'static str, entry: u64, is_user: bool) -> KernelResult<TaskId> {
    let task = Task::create(name, entry, is_user)?;
    let id = task.id;
    add_ready(task);
    Ok(id)
}

/// As `spawn`, for a user task whose image was already loaded into
/// `address_space` (see `elf::load`) — used by the `spawn` syscall
/// (spec.md §4.8 #20).
pub fn spawn_in_address_space(name: &'static str, entry: u64, address_space: crate::mm::PhysAddr) -> KernelResult<TaskId> {
    let task = Task::create_in_address_space(name, entry, address_space)?;
    let id = task.id;
    add_ready(task);
    Ok(id)
}

fn add_ready(mut task: Task) {
    task.state = TaskState::Ready;
    let id = task.id;
    let mut inner = SCHEDULER.lock();
    inner.tasks.insert(id, Box::new(task));
    inner.ready.push_back(id);
}

/// The bootstrap dispatch: pick the first READY task and jump into it
/// without saving anything (`from == null`), per spec.md §4.7 `start()`.
/// Never returns.
pub fn start() -> ! {
    let to_ptr: *const RegisterFrame = {
        let mut inner = SCHEDULER.lock();
        let id = inner
            .ready
            .pop_front()
            .expect("scheduling with an empty ready queue is a fatal kernel bug");
        let task = inner.tasks.get_mut(&id).expect("ready task must exist in the task table");
        task.state = TaskState::Running;
        arch::set_kernel_stack(task.kernel_stack_top);
        inner.current = Some(id);
        inner.started = true;
        &task.frame as *const RegisterFrame
    };

    // SAFETY: `to_ptr` was just populated from a live, fully-seeded TCB
    // still owned by `SCHEDULER`; `from == null` skips the save half.
    unsafe { switch_context(core::ptr::null_mut(), to_ptr) };
    unreachable!("switch_context never returns to its caller");
}

/// The preemption entry, per spec.md §4.7: equivalent to `yield_now`,
/// safe to call from interrupt context.
pub fn on_tick() {
    yield_now();
}

/// Voluntary/preemptive reschedule, per spec.md §4.7's `yield()`.
pub fn yield_now() {
    without_interrupts(|| {
        let (from_ptr, to_ptr) = {
            let mut inner = SCHEDULER.lock();
            if inner.ready.is_empty() {
                return;
            }

            if let Some(old_id) = inner.current {
                if let Some(task) = inner.tasks.get_mut(&old_id) {
                    if task.state == TaskState::Running {
                        task.state = TaskState::Ready;
                        inner.ready.push_back(old_id);
                    }
                }
            }

            let new_id = inner
                .ready
                .pop_front()
                .expect("checked non-empty above");
            let new_task = inner
                .tasks
                .get_mut(&new_id)
                .expect("ready task must exist in the task table");
            new_task.state = TaskState::Running;
            arch::set_kernel_stack(new_task.kernel_stack_top);

            let from_ptr: *mut RegisterFrame = match inner.current {
                Some(old_id) => inner
                    .tasks
                    .get_mut(&old_id)
                    .map_or(core::ptr::null_mut(), |t| &mut t.frame as *mut RegisterFrame),
                None => core::ptr::null_mut(),
            };
            let to_ptr: *const RegisterFrame =
                &inner.tasks.get(&new_id).unwrap().frame as *const RegisterFrame;

            inner.current = Some(new_id);
            (from_ptr, to_ptr)
        };

        // SAFETY: both pointers, when non-null, point at TCBs owned by
        // `SCHEDULER` and kept alive across this call since the lock
        // above was released only after they were read; interrupts are
        // disabled for the whole critical section so no concurrent
        // mutation of the task table can invalidate them.
        unsafe { switch_context(from_ptr, to_ptr) };
    });
}

/// Remove `id` from any queue, mark TERMINATED, and free its resources,
/// per spec.md §4.6's `terminate_task`.
fn terminate(id: TaskId) {
    let mut inner = SCHEDULER.lock();
    inner.ready.remove(id);
    if let Some(mut task) = inner.tasks.remove(&id) {
        task.state = TaskState::Terminated;
        if task.owns_address_space {
            vmm::destroy_address_space(task.address_space);
        }
        // `task`'s kernel stack (a `Box<[u8]>`) and the TCB itself are
        // freed here, when `task` drops.
    }
}

/// Terminate the calling task and switch directly into the next READY
/// task, abandoning the caller's context entirely. Used by the exit
/// syscall and by a user-mode fault handler (spec.md §9's stricter-
/// than-source containment: only the faulting task dies).
pub fn terminate_current_and_reschedule() -> ! {
    without_interrupts(|| {
        let to_ptr: *const RegisterFrame = {
            let mut inner = SCHEDULER.lock();
            let current = inner.current.take().expect("a task must be current to terminate");
            drop(inner);
            terminate(current);

            let mut inner = SCHEDULER.lock();
            let new_id = inner
                .ready
                .pop_front()
                .expect("scheduling with an empty ready queue is a fatal kernel bug");
            let task = inner.tasks.get_mut(&new_id).expect("ready task must exist in the task table");
            task.state = TaskState::Running;
            arch::set_kernel_stack(task.kernel_stack_top);
            inner.current = Some(new_id);
            &task.frame as *const RegisterFrame
        };

        // SAFETY: the terminated task's frame is never touched again;
        // only the save-less path (`from == null`) is used.
        unsafe { switch_context(core::ptr::null_mut(), to_ptr) };
    });
    unreachable!("switch_context never returns to its caller");
}

pub fn current_task_id() -> Option<TaskId> {
    SCHEDULER.lock().current
}

/// Look up whether `id` still names a live task — used by I/O paths
/// that need to validate a task before touching its address space.
pub fn task_exists(id: TaskId) -> bool {
    SCHEDULER.lock().tasks.contains_key(&id)
}

/// `KernelError::NotFound` helper for callers that need a `Result`.
pub fn require_task(id: TaskId) -> KernelResult<()> {
    if task_exists(id) {
        Ok(())
    } else {
        Err(KernelError::NotFound { resource: "task" })
    }
}

/// The address space the currently running task was dispatched with —
/// used by `syscall::dispatch` to bounds-check a user pointer before
/// dereferencing it, per spec.md §4.8.
pub fn current_task_address_space() -> Option<crate::mm::PhysAddr> {
    let inner = SCHEDULER.lock();
    let id = inner.current?;
    inner.tasks.get(&id).map(|t| t.address_space)
}
