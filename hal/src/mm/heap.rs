// SPDX-License-Identifier: MPL-2.0

//! The kernel heap.

use core::{
    alloc::{GlobalAlloc, Layout},
    cell::UnsafeCell,
    ptr::NonNull,
};

use buddy_system_allocator::Heap;

use crate::{config::KERNEL_HEAP_SIZE, sync::SpinLock};

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::new();

#[repr(align(4096))]
struct HeapSpace(UnsafeCell<[u8; KERNEL_HEAP_SIZE]>);

// SAFETY: only the allocator touches the arena after `init`.
unsafe impl Sync for HeapSpace {}

static HEAP_SPACE: HeapSpace = HeapSpace(UnsafeCell::new([0; KERNEL_HEAP_SIZE]));

struct LockedHeap<const ORDER: usize> {
    heap: SpinLock<Heap<ORDER>>,
}

impl<const ORDER: usize> LockedHeap<ORDER> {
    const fn new() -> Self {
        Self {
            heap: SpinLock::new(Heap::<ORDER>::new()),
        }
    }

    /// # Safety
    ///
    /// The range `[start, start + size)` must be a valid memory region.
    unsafe fn init(&self, start: *const u8, size: usize) {
        self.heap.lock_irq_disabled().init(start as usize, size);
    }
}

unsafe impl<const ORDER: usize> GlobalAlloc for LockedHeap<ORDER> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.heap.lock_irq_disabled().alloc(layout) {
            Ok(allocation) => allocation.as_ptr(),
            Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        debug_assert!(!ptr.is_null());
        self.heap
            .lock_irq_disabled()
            .dealloc(NonNull::new_unchecked(ptr), layout)
    }
}

/// Hands the static arena to the allocator. Must run before the first
/// allocation.
pub(crate) fn init() {
    // SAFETY: the arena is reserved for the heap and handed over once.
    unsafe {
        HEAP_ALLOCATOR.init(HEAP_SPACE.0.get() as *const u8, KERNEL_HEAP_SIZE);
    }
}
