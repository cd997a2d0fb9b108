// SPDX-License-Identifier: MPL-2.0

//! Physical and virtual memory management.
//!
//! Layered bottom-up: the boot memory map, the page-frame allocator, the
//! kernel page pool, the page-level operations over page directories, and
//! the virtual-memory-space manager on top.

pub mod frame;
pub mod heap;
pub mod kpool;
pub mod mmap;
pub mod page;
pub mod page_table;
pub mod tlb;
pub mod vmem;

pub(crate) mod memory;

use log::info;

pub use self::frame::{FrameNumber, FRAME_NULL};
pub use self::page::{AccessMode, PageInfo};

/// A physical address.
pub type Paddr = usize;

/// A virtual address.
pub type Vaddr = usize;

use crate::config::{KPOOL_BASE_PHYS, KPOOL_END_PHYS, PAGE_SIZE};

/// Checks whether an address sits on a page boundary.
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

/// Translates a physical address the kernel owns into a dereferencable
/// virtual address.
///
/// The only physical memory the kernel itself dereferences through this
/// translation is the kernel page pool; the pool is backed by a statically
/// reserved arena, so the translation holds both on bare metal (where the
/// arena is pinned at its physical window) and hosted.
pub fn paddr_to_vaddr(paddr: Paddr) -> Vaddr {
    if (KPOOL_BASE_PHYS..KPOOL_END_PHYS).contains(&paddr) {
        return kpool::paddr_to_vaddr(paddr);
    }
    cfg_if::cfg_if! {
        if #[cfg(target_os = "none")] {
            // Kernel memory is identity-mapped.
            paddr
        } else {
            panic!("paddr {:#x} is not addressable", paddr);
        }
    }
}

/// Translates a kernel-pool virtual address back to its physical address.
pub fn vaddr_to_paddr(vaddr: Vaddr) -> Paddr {
    if kpool::is_kpage(vaddr & !(PAGE_SIZE - 1)) {
        return kpool::vaddr_to_paddr(vaddr);
    }
    cfg_if::cfg_if! {
        if #[cfg(target_os = "none")] {
            vaddr
        } else {
            panic!("vaddr {:#x} has no physical window", vaddr);
        }
    }
}

/// Brings up the memory managers in dependency order.
///
/// The boot code must have committed the memory map beforehand; the frame
/// allocator consumes it once to book reserved and malfunctioning ranges.
pub(crate) fn init() {
    info!("initializing memory management...");
    #[cfg(target_os = "none")]
    heap::init();
    frame::init();
    kpool::init();
    let root_pgdir = memory::init();
    vmem::init(root_pgdir);
}
