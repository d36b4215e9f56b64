//! C4 — kernel heap. A bump allocator backed directly by C2 frames:
//! `alloc` advances a cursor and pulls a fresh frame from the PMM
//! whenever the cursor crosses a page boundary; `dealloc` is a no-op.
//! Grounded on `doublegate-VeridianOS/kernel/src/mm/heap.rs`'s
//! `GlobalAlloc` impl shape, but replacing the teacher's
//! `linked_list_allocator`-backed free-list with the bump strategy
//! spec.md §4.3/§9 mandates — reclamation is explicitly out of scope
//! for this kernel, matching `original_source/kernel/src/heap.cpp`'s
//! own "sbrk-only, never shrinks" allocator.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use crate::mm::{frame_allocator, PAGE_SIZE};

struct BumpState {
    /// Next free byte. `0` until `init` runs.
    cursor: usize,
    /// One past the last byte backed by a frame obtained so far.
    limit: usize,
}

struct BumpHeap {
    state: Mutex<BumpState>,
}

unsafe impl GlobalAlloc for BumpHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut state = self.state.lock();
        if state.cursor == 0 {
            // Heap region not yet initialized; fail rather than hand
            // out an address nothing backs.
            return core::ptr::null_mut();
        }

        let aligned = align_up(state.cursor, layout.align());
        let end = match aligned.checked_add(layout.size()) {
            Some(end) => end,
            None => return core::ptr::null_mut(),
        };

        while end > state.limit {
            match frame_allocator::alloc_pages(1) {
                Some(frame) => {
                    let frame_addr = frame * PAGE_SIZE;
                    // The bump region is a single contiguous run; a
                    // non-adjacent frame would break the cursor/limit
                    // invariant. The PMM's first-fit policy keeps this
                    // true in practice for the kernel's early, steady
                    // heap growth.
                    debug_assert_eq!(frame_addr, state.limit, "heap frames must be contiguous");
                    state.limit += PAGE_SIZE;
                }
                None => return core::ptr::null_mut(),
            }
        }

        state.cursor = end;
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // Bump allocator: individual frees are no-ops. Memory is
        // reclaimed only in bulk, which this kernel never does for the
        // heap.
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[global_allocator]
static HEAP: BumpHeap = BumpHeap {
    state: Mutex::new(BumpState { cursor: 0, limit: 0 }),
};

/// Seed the bump region at `start` (a frame-aligned address owned
/// exclusively by the heap from here on). Must run once, after C2 is
/// initialized and before the first allocation.
pub fn init(start: NonNull<u8>) {
    let addr = start.as_ptr() as usize;
    debug_assert_eq!(addr % PAGE_SIZE, 0, "heap base must be frame-aligned");
    let mut state = HEAP.state.lock();
    state.cursor = addr;
    state.limit = addr;
}

#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
    panic!("heap allocation failed: {:?}", layout);
}
