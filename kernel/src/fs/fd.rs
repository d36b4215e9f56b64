//! File-descriptor external-collaborator surface. Closed tag set per
//! spec.md §9's design note ("`FileDescriptor ∈ {Console, Keyboard,
//! Pipe, File}`"). `Pipe`'s bounded ring buffer is grounded on
//! `doublegate-VeridianOS/kernel/src/fs/pipe.rs`'s `PipeInner`, collapsed
//! from the teacher's split reader/writer `Arc<Mutex<_>>` handles into a
//! single in-kernel buffer addressed by `FileDescriptor` directly — this
//! core has no process-boundary pipe handoff, only the syscall table.

use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::serial;

const PIPE_CAPACITY: usize = 64 * 1024;

pub enum FileDescriptor {
    /// Bound to the owning task's serial console.
    Console,
    /// PS/2 and USB HID are out of this core's scope (spec.md §1); the
    /// variant exists so the tag set is closed.
    Keyboard,
    Pipe { buffer: VecDeque<u8>, capacity: usize },
    /// Filesystem directory formats (FAT32) are out of this core's
    /// scope; a `File` FD addresses a fixed block range directly.
    File {
        device: BlockDevice,
        start_block: u64,
        cursor: u64,
    },
}

impl FileDescriptor {
    pub fn new_pipe() -> Self {
        Self::Pipe {
            buffer: VecDeque::with_capacity(PIPE_CAPACITY),
            capacity: PIPE_CAPACITY,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        match self {
            Self::Console => Err(KernelError::UnsupportedFeature {
                feature: "console_read",
            }),
            Self::Keyboard => Err(KernelError::UnsupportedFeature { feature: "keyboard" }),
            Self::Pipe { buffer, .. } => {
                let n = buf.len().min(buffer.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = buffer.pop_front().expect("checked length above");
                }
                Ok(n)
            }
            Self::File { .. } => Err(KernelError::UnsupportedFeature {
                feature: "file_read",
            }),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> KernelResult<usize> {
        match self {
            Self::Console => {
                for &byte in buf {
                    serial::write_byte(byte);
                }
                Ok(buf.len())
            }
            Self::Keyboard => Err(KernelError::UnsupportedFeature { feature: "keyboard" }),
            Self::Pipe { buffer, capacity } => {
                let room = capacity.saturating_sub(buffer.len());
                let n = buf.len().min(room);
                buffer.extend(buf[..n].iter().copied());
                Ok(n)
            }
            Self::File { .. } => Err(KernelError::UnsupportedFeature {
                feature: "file_write",
            }),
        }
    }

    pub fn put_char(&mut self, c: u8) -> KernelResult<()> {
        self.write(&[c]).map(|_| ())
    }
}

pub type FdTable = BTreeMap<u32, FileDescriptor>;

/// Global per-task FD tables, keyed by task id. Per spec.md §9's "global
/// mutable state" resolution: one well-known accessor, guarded by a
/// single lock, no scattered statics.
static FD_TABLES: Mutex<BTreeMap<u64, FdTable>> = Mutex::new(BTreeMap::new());

/// Give `task_id` a fresh FD table with FD 0 bound to its console.
pub fn init_task_fds(task_id: u64) {
    let mut table = FdTable::new();
    table.insert(0, FileDescriptor::Console);
    FD_TABLES.lock().insert(task_id, table);
}

pub fn drop_task_fds(task_id: u64) {
    FD_TABLES.lock().remove(&task_id);
}

pub fn with_fd<R>(task_id: u64, fd: u32, f: impl FnOnce(&mut FileDescriptor) -> KernelResult<R>) -> KernelResult<R> {
    let mut tables = FD_TABLES.lock();
    let table = tables.get_mut(&task_id).ok_or(KernelError::NotFound { resource: "task_fd_table" })?;
    let descriptor = table.get_mut(&fd).ok_or(KernelError::NotFound { resource: "fd" })?;
    f(descriptor)
}

/// Insert a new FD into `task_id`'s table, returning its number.
pub fn insert_fd(task_id: u64, descriptor: FileDescriptor) -> KernelResult<u32> {
    let mut tables = FD_TABLES.lock();
    let table = tables.get_mut(&task_id).ok_or(KernelError::NotFound { resource: "task_fd_table" })?;
    let next = table.keys().next_back().map_or(0, |last| last + 1);
    table.insert(next, descriptor);
    Ok(next)
}

pub fn close_fd(task_id: u64, fd: u32) -> KernelResult<()> {
    let mut tables = FD_TABLES.lock();
    let table = tables.get_mut(&task_id).ok_or(KernelError::NotFound { resource: "task_fd_table" })?;
    table.remove(&fd).ok_or(KernelError::NotFound { resource: "fd" })?;
    Ok(())
}
