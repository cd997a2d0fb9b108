// SPDX-License-Identifier: MPL-2.0

//! The kernel page pool.
//!
//! A fixed virtual window of [`NUM_KPAGES`] pages handed out with small
//! reference counts. Page directories, page tables and kernel stacks all
//! come from here. The window is backed by a statically reserved arena
//! pinned at the pool's physical range on bare metal.

use core::cell::UnsafeCell;

use log::error;

use crate::{
    config::{KPOOL_BASE_PHYS, KPOOL_SIZE, NUM_KPAGES, PAGE_SHIFT, PAGE_SIZE},
    mm::{Paddr, Vaddr},
    sync::SpinLock,
    Error, Result,
};

#[repr(C, align(4096))]
struct KpoolArena(UnsafeCell<[u8; KPOOL_SIZE]>);

// SAFETY: pages are only reachable while their reference count is held.
unsafe impl Sync for KpoolArena {}

static ARENA: KpoolArena = KpoolArena(UnsafeCell::new([0; KPOOL_SIZE]));

pub(crate) struct Kpool {
    refs: [u16; NUM_KPAGES],
}

impl Kpool {
    pub(crate) const fn new() -> Self {
        Self {
            refs: [0; NUM_KPAGES],
        }
    }

    fn get(&mut self) -> Option<usize> {
        for (id, count) in self.refs.iter_mut().enumerate() {
            if *count == 0 {
                *count = 1;
                return Some(id);
            }
        }
        error!("kernel page pool overflow");
        None
    }

    fn put(&mut self, id: usize) -> Result<()> {
        if self.refs[id] == 0 {
            error!("double free on kernel page {}", id);
            return Err(Error::InvalidArgs);
        }
        self.refs[id] -= 1;
        Ok(())
    }
}

static KPOOL: SpinLock<Kpool> = SpinLock::new(Kpool::new());

/// Base virtual address of the pool.
fn base() -> Vaddr {
    ARENA.0.get() as Vaddr
}

/// Translates a pool page index into its virtual address.
pub(crate) fn id_to_vaddr(id: usize) -> Vaddr {
    base() + (id << PAGE_SHIFT)
}

fn vaddr_to_id(vaddr: Vaddr) -> usize {
    (vaddr - base()) >> PAGE_SHIFT
}

/// Checks whether `vaddr` points into the kernel page pool.
pub fn is_kpage(vaddr: Vaddr) -> bool {
    (base()..base() + KPOOL_SIZE).contains(&vaddr) && vaddr % PAGE_SIZE == 0
}

/// Translates a pool virtual address into its modeled physical address.
pub(crate) fn vaddr_to_paddr(vaddr: Vaddr) -> Paddr {
    KPOOL_BASE_PHYS + (vaddr - base())
}

/// Translates a pool physical address into its virtual address.
pub(crate) fn paddr_to_vaddr(paddr: Paddr) -> Vaddr {
    base() + (paddr - KPOOL_BASE_PHYS)
}

/// Allocates a kernel page, zeroing it when `clean` is set.
///
/// Fails with [`Error::NoMemory`] when every page of the pool is
/// referenced.
pub fn kpage_get(clean: bool) -> Result<Vaddr> {
    let id = KPOOL.lock_irq_disabled().get().ok_or(Error::NoMemory)?;
    let vaddr = id_to_vaddr(id);

    if clean {
        // SAFETY: the page just became exclusively ours.
        unsafe {
            core::ptr::write_bytes(vaddr as *mut u8, 0, PAGE_SIZE);
        }
    }

    Ok(vaddr)
}

/// Releases a kernel page.
///
/// The page is returned to the pool when its reference count reaches zero;
/// releasing an unreferenced page is an error.
pub fn kpage_put(vaddr: Vaddr) -> Result<()> {
    if !is_kpage(vaddr) {
        error!("not a kernel page (vaddr={:#x})", vaddr);
        return Err(Error::InvalidArgs);
    }

    KPOOL.lock_irq_disabled().put(vaddr_to_id(vaddr))
}

/// Initializes the kernel page pool.
pub(crate) fn init() {
    log::info!("initializing the kernel page allocator");
}
