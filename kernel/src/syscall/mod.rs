//! C9 — syscall dispatch table. Grounded on
//! `doublegate-VeridianOS/kernel/src/syscall/mod.rs`'s `syscall_handler`/
//! `handle_syscall` split (numeric dispatch, per-call argument
//! marshalling), trimmed to spec.md §4.8's eleven-entry table. Shared by
//! both architectures: `arch::x86_64::syscall::syscall_entry` and
//! `arch::aarch64::exceptions::handle_sync_exception` both land here
//! with the same `(nr, a0, a1, a2, a3)` convention, since neither trap
//! path reloads the translation root — the calling task's own address
//! space is still active, so a validated user pointer can be
//! dereferenced directly.

use crate::elf;
use crate::error::KernelError;
use crate::fs::fd::{self, FileDescriptor};
use crate::mm::{vmm, VirtAddr};
use crate::sched::scheduler;
use crate::sched::TaskId;

const SYS_PUT_CHAR: u64 = 1;
const SYS_EXIT: u64 = 2;
const SYS_READ: u64 = 5;
const SYS_WRITE: u64 = 6;
const SYS_YIELD: u64 = 10;
const SYS_TASK_EXIT: u64 = 11;
const SYS_SPAWN: u64 = 20;
const SYS_OPEN: u64 = 21;
const SYS_CLOSE: u64 = 22;
const SYS_DELETE_FILE: u64 = 23;

/// Encode an error as a single word: bit 63 set, low byte the error
/// code from `KernelError::code`. A successful call never sets bit 63,
/// since every success value named in spec.md §4.8 (byte counts, FD
/// numbers, task ids) comfortably fits the remaining 63 bits.
const ERROR_BIT: u64 = 1 << 63;

fn ok(value: u64) -> u64 {
    value
}

fn err(e: KernelError) -> u64 {
    ERROR_BIT | e.code()
}

/// Validate that `[ptr, ptr+len)` lies inside the calling task's own
/// address space and is `USER`-accessible, per spec.md §4.8's bounds-
/// check requirement. Kernel tasks (no user address space of their own)
/// are trusted, matching spec.md §9's scope (syscalls are a user-mode
/// entry point; kernel code never traps through this path).
fn check_user_buffer(ptr: u64, len: usize) -> Result<(), KernelError> {
    let root = scheduler::current_task_address_space().ok_or(KernelError::NotFound {
        resource: "current_task",
    })?;
    if vmm::validate_user_range(root, VirtAddr::new(ptr), len) {
        Ok(())
    } else {
        Err(KernelError::AddressSpaceViolation { addr: ptr as usize })
    }
}

fn current_task_id() -> Result<TaskId, KernelError> {
    scheduler::current_task_id().ok_or(KernelError::NotFound { resource: "current_task" })
}

fn sys_put_char(c: u64) -> u64 {
    let id = match current_task_id() {
        Ok(id) => id,
        Err(e) => return err(e),
    };
    let byte = c as u8;
    match fd::with_fd(id.0, 0, |descriptor| descriptor.put_char(byte)) {
        Ok(()) => ok(0),
        Err(e) => err(e),
    }
}

fn sys_exit() -> ! {
    if let Ok(id) = current_task_id() {
        fd::drop_task_fds(id.0);
    }
    scheduler::terminate_current_and_reschedule();
}

fn sys_read(fd_num: u64, buf: u64, n: u64) -> u64 {
    let id = match current_task_id() {
        Ok(id) => id,
        Err(e) => return err(e),
    };
    let len = n as usize;
    if let Err(e) = check_user_buffer(buf, len) {
        return err(e);
    }
    // SAFETY: `check_user_buffer` confirmed every page of this range is
    // present and `USER` in the currently active address space, which
    // is the calling task's own — the same root the MMU is using right
    // now, since syscall entry never reloads it.
    let slice = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, len) };
    match fd::with_fd(id.0, fd_num as u32, |descriptor| descriptor.read(slice)) {
        Ok(n) => ok(n as u64),
        Err(e) => err(e),
    }
}

fn sys_write(fd_num: u64, buf: u64, n: u64) -> u64 {
    let id = match current_task_id() {
        Ok(id) => id,
        Err(e) => return err(e),
    };
    let len = n as usize;
    if let Err(e) = check_user_buffer(buf, len) {
        return err(e);
    }
    // SAFETY: see `sys_read`.
    let slice = unsafe { core::slice::from_raw_parts(buf as *const u8, len) };
    match fd::with_fd(id.0, fd_num as u32, |descriptor| descriptor.write(slice)) {
        Ok(n) => ok(n as u64),
        Err(e) => err(e),
    }
}

fn sys_yield() -> u64 {
    scheduler::yield_now();
    ok(0)
}

/// `spawn(image_ptr, image_len, argv_ptr) → task_id`. Path-based
/// resolution (FAT32/Sylph1FS directory formats) is a filesystem
/// concern out of this core's scope (spec.md §1), so this reuses the
/// `path`/`argc` argument slots for the one image source this core can
/// actually serve without one: a raw ELF64 image already staged in the
/// caller's own memory, `image_ptr`/`image_len` bytes long. `argv_ptr`
/// is accepted but not yet passed to the new task (no argv convention
/// is defined at this layer).
fn sys_spawn(image_ptr: u64, image_len: u64, _argv: u64) -> u64 {
    let len = image_len as usize;
    if let Err(e) = check_user_buffer(image_ptr, len) {
        return err(e);
    }
    // SAFETY: `check_user_buffer` confirmed this range is present and
    // `USER` in the calling task's own currently active address space.
    let image = unsafe { core::slice::from_raw_parts(image_ptr as *const u8, len) };

    let address_space = match vmm::create_address_space() {
        Ok(space) => space,
        Err(e) => return err(e),
    };
    let entry = match elf::load(image, address_space) {
        Ok(entry) => entry,
        Err(e) => {
            vmm::destroy_address_space(address_space);
            return err(e);
        }
    };
    match scheduler::spawn_in_address_space("spawned", entry, address_space) {
        Ok(id) => ok(id.0),
        Err(e) => {
            vmm::destroy_address_space(address_space);
            err(e)
        }
    }
}

/// Longest `path` this core will scan looking for a NUL terminator,
/// before giving up and rejecting the call — `open`/`delete_file` take a
/// bare pointer with no explicit length, per spec.md §4.8's table.
const MAX_PATH_LEN: usize = 256;

/// Validate that `ptr` addresses a NUL-terminated string no longer than
/// `MAX_PATH_LEN`, one page-checked byte at a time (cheap: paths are
/// short and usually fit in a single checked page).
fn check_user_cstr(ptr: u64) -> Result<(), KernelError> {
    for i in 0..MAX_PATH_LEN as u64 {
        check_user_buffer(ptr + i, 1)?;
        // SAFETY: just bounds-checked.
        let byte = unsafe { core::ptr::read((ptr + i) as *const u8) };
        if byte == 0 {
            return Ok(());
        }
    }
    Err(KernelError::InvalidArgument { name: "path", value: "not_nul_terminated" })
}

fn sys_open(path: u64, _flags: u64) -> u64 {
    if let Err(e) = check_user_cstr(path) {
        return err(e);
    }
    // Directory formats (FAT32) are out of this core's scope (spec.md
    // §1); there is no backing store to resolve `path` against yet.
    err(KernelError::UnsupportedFeature { feature: "open_without_filesystem" })
}

fn sys_close(fd_num: u64) -> u64 {
    let id = match current_task_id() {
        Ok(id) => id,
        Err(e) => return err(e),
    };
    match fd::close_fd(id.0, fd_num as u32) {
        Ok(()) => ok(0),
        Err(e) => err(e),
    }
}

fn sys_delete_file(path: u64) -> u64 {
    if let Err(e) = check_user_cstr(path) {
        return err(e);
    }
    err(KernelError::UnsupportedFeature { feature: "delete_file_without_filesystem" })
}

/// The shared numeric dispatch, called from both architectures'
/// trap-entry code with the SYSCALL/SVC argument convention already
/// normalized into `(nr, a0, a1, a2, a3)`. Returns the raw value to
/// place back in the caller's return register.
pub extern "C" fn dispatch(nr: u64, a0: u64, a1: u64, a2: u64, _a3: u64) -> u64 {
    match nr {
        SYS_PUT_CHAR => sys_put_char(a0),
        SYS_EXIT | SYS_TASK_EXIT => sys_exit(),
        SYS_READ => sys_read(a0, a1, a2),
        SYS_WRITE => sys_write(a0, a1, a2),
        SYS_YIELD => sys_yield(),
        SYS_SPAWN => sys_spawn(a0, a1, a2),
        SYS_OPEN => sys_open(a0, a1),
        SYS_CLOSE => sys_close(a0),
        SYS_DELETE_FILE => sys_delete_file(a0),
        _ => {
            log::warn!("unknown syscall number {}", nr);
            err(KernelError::InvalidArgument { name: "syscall_number", value: "unrecognized" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_encoding_sets_high_bit() {
        let code = err(KernelError::NotFound { resource: "x" });
        assert_ne!(code & ERROR_BIT, 0);
    }

    #[test]
    fn success_never_sets_high_bit_for_small_values() {
        assert_eq!(ok(42) & ERROR_BIT, 0);
    }
}
