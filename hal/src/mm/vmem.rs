// SPDX-License-Identifier: MPL-2.0

//! The virtual-memory-space manager.
//!
//! Address spaces are handles into a fixed table; each entry owns a root
//! page directory allocated from the kernel pool. Handle 0 is the root
//! space built at boot: its kernel mappings are linked into every space
//! created afterwards, so kernel code stays visible across switches.
//!
//! One global lock serializes the table and every page operation going
//! through it; a caller's map/unmap sequence on a space is observed in
//! order by any concurrent reader of the same space. Nothing is promised
//! across spaces.

use log::{error, info};

use crate::{
    config::{PAGE_SIZE, USER_BASE_VIRT, USER_END_VIRT, VMEM_MAX},
    mm::{
        kpool,
        page::{self, AccessMode, PageInfo},
        page_table::{pde_index, PageDirectory, PageEntry},
        FrameNumber, Vaddr,
    },
    sync::SpinLock,
    Error, Result,
};

/// A handle to a virtual memory space.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Vmem(u32);

impl Vmem {
    /// The root virtual memory space.
    pub const fn root() -> Self {
        Vmem(0)
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Rebuilds a handle from a raw index, as carried in kernel calls.
    pub const fn from_raw(raw: u32) -> Self {
        Vmem(raw)
    }
}

#[derive(Clone, Copy)]
struct Entry {
    used: bool,
    pgdir: Vaddr,
}

pub(crate) struct VmemTable {
    entries: [Entry; VMEM_MAX],
}

impl VmemTable {
    const fn new() -> Self {
        Self {
            entries: [Entry {
                used: false,
                pgdir: 0,
            }; VMEM_MAX],
        }
    }

    fn is_valid(&self, vmem: Vmem) -> bool {
        vmem.index() < VMEM_MAX && self.entries[vmem.index()].used
    }

    fn alloc(&mut self) -> Option<usize> {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if !entry.used {
                entry.used = true;
                return Some(i);
            }
        }
        error!("no more virtual memory spaces are available");
        None
    }

    fn pgdir_mut(&self, vmem: Vmem) -> Result<&'static mut PageDirectory> {
        if !self.is_valid(vmem) {
            error!("invalid virtual memory space {}", vmem.index());
            return Err(Error::InvalidArgs);
        }
        // SAFETY: a used entry always holds a live pool-backed directory,
        // and the table lock serializes every access going through it.
        Ok(unsafe { &mut *(self.entries[vmem.index()].pgdir as *mut PageDirectory) })
    }
}

static VMEM: SpinLock<VmemTable> = SpinLock::new(VmemTable::new());

/// Creates a virtual memory space.
///
/// The kernel-range directory entries of the new space are linked to the
/// root's, so every kernel mapping is shared.
pub fn create() -> Result<Vmem> {
    let mut table = VMEM.lock_irq_disabled();

    let index = table.alloc().ok_or(Error::NoMemory)?;

    let pgdir_vaddr = match kpool::kpage_get(true) {
        Ok(vaddr) => vaddr,
        Err(err) => {
            table.entries[index].used = false;
            return Err(err);
        }
    };

    // Link every present entry of the root directory into the new one.
    // The root space only carries kernel-range mappings, so this is the
    // kernel link-up.
    {
        // SAFETY: the root directory is live for the kernel lifetime; the
        // fresh page is exclusively ours.
        let src = unsafe { &*(table.entries[0].pgdir as *const PageDirectory) };
        let dst = unsafe { &mut *(pgdir_vaddr as *mut PageDirectory) };
        for (dst_pde, src_pde) in dst.entries.iter_mut().zip(src.entries.iter()) {
            if src_pde.is_present() {
                *dst_pde = *src_pde;
            }
        }
    }

    table.entries[index].pgdir = pgdir_vaddr;

    Ok(Vmem(index as u32))
}

/// Destroys a virtual memory space.
///
/// The root space cannot be destroyed, and neither can a space that still
/// has user mappings ([`Error::Busy`]).
pub fn destroy(vmem: Vmem) -> Result<()> {
    let mut table = VMEM.lock_irq_disabled();

    if !table.is_valid(vmem) {
        error!("invalid virtual memory space {}", vmem.index());
        return Err(Error::InvalidArgs);
    }

    if vmem == Vmem::root() {
        error!("cannot destroy root virtual memory space");
        return Err(Error::AccessDenied);
    }

    {
        let pgdir = table.pgdir_mut(vmem)?;
        for i in pde_index(USER_BASE_VIRT)..pde_index(USER_END_VIRT) {
            if pgdir.entry(i).is_present() {
                error!("virtual memory space {} is busy", vmem.index());
                return Err(Error::Busy);
            }
        }
    }

    kpool::kpage_put(table.entries[vmem.index()].pgdir)?;
    table.entries[vmem.index()] = Entry {
        used: false,
        pgdir: 0,
    };

    Ok(())
}

/// Allocates a frame and attaches it at `addr`.
///
/// Only page-sized ranges are supported.
pub fn attach(vmem: Vmem, addr: Vaddr, size: usize) -> Result<()> {
    if size != PAGE_SIZE {
        panic!("unsupported range size {}", size);
    }

    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    page::upage_alloc(pgdir, addr, true, false)
}

/// Installs `frame` at `vaddr` with the given write/execute access.
///
/// Only page-sized ranges are supported.
pub fn map(
    vmem: Vmem,
    vaddr: Vaddr,
    frame: FrameNumber,
    size: usize,
    w: bool,
    x: bool,
) -> Result<()> {
    if size != PAGE_SIZE {
        panic!("unsupported range size {}", size);
    }

    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    page::upage_map(pgdir, vaddr, frame, w, x)
}

/// Removes the mapping at `vaddr`, returning the frame it carried.
pub fn unmap(vmem: Vmem, vaddr: Vaddr) -> Result<FrameNumber> {
    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    page::upage_unmap(pgdir, vaddr)
}

/// Drops every user-range mapping of the space.
///
/// Page tables go back to the kernel pool; the frames that were installed
/// stay with their owners. After a clear the space is destroyable.
pub fn clear(vmem: Vmem) -> Result<()> {
    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;

    for i in pde_index(USER_BASE_VIRT)..pde_index(USER_END_VIRT) {
        let pde = pgdir.entry_mut(i);
        if !pde.is_present() {
            continue;
        }
        let pgtab_vaddr =
            crate::mm::paddr_to_vaddr((pde.frame() as crate::mm::Paddr) << crate::config::PAGE_SHIFT);
        pde.clear();
        kpool::kpage_put(pgtab_vaddr)?;
    }

    crate::mm::tlb::flush_all();

    Ok(())
}

/// Changes the access permissions of the page at `vaddr`.
pub fn ctrl(vmem: Vmem, vaddr: Vaddr, mode: AccessMode) -> Result<()> {
    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    page::upage_ctrl(pgdir, vaddr, mode)
}

/// Reports the frame and permissions of the page at `vaddr`.
pub fn info(vmem: Vmem, vaddr: Vaddr) -> Result<PageInfo> {
    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    page::upage_info(pgdir, vaddr)
}

/// Logs every present directory entry of the space.
pub fn print(vmem: Vmem) -> Result<()> {
    let table = VMEM.lock_irq_disabled();
    let pgdir = table.pgdir_mut(vmem)?;
    for (i, pde) in pgdir.entries.iter().enumerate() {
        if pde.is_present() {
            info!("pde={}, frame={:#x}", i, pde.frame());
        }
    }
    Ok(())
}

/// Initializes the virtual memory manager with the boot-built root
/// directory.
pub(crate) fn init(root_pgdir: Vaddr) -> Vmem {
    let mut table = VMEM.lock_irq_disabled();

    if table.entries[0].used {
        panic!("virtual memory manager was already initialized");
    }

    info!("initializing the virtual memory manager...");

    table.entries[0] = Entry {
        used: true,
        pgdir: root_pgdir,
    };

    info!("{} virtual memory spaces available", VMEM_MAX - 1);

    Vmem::root()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Tests share the process-wide table; the root space is faked once
    /// with an empty pool-backed directory.
    pub(crate) fn ensure_root() {
        let mut table = VMEM.lock_irq_disabled();
        if !table.entries[0].used {
            let pgdir = kpool::kpage_get(true).unwrap();
            table.entries[0] = Entry { used: true, pgdir };
        }
    }

    const ADDR: Vaddr = 0x8000_0000;

    #[test]
    fn lifecycle_with_busy_detection() {
        let _env = crate::test_util::env_lock();
        ensure_root();

        let v = create().unwrap();
        attach(v, ADDR, PAGE_SIZE).unwrap();

        // Busy: a user mapping is still present.
        assert_eq!(destroy(v), Err(Error::Busy));

        let frame = unmap(v, ADDR).unwrap();
        assert_ne!(frame, crate::mm::FRAME_NULL);
        assert_eq!(destroy(v), Ok(()));
        assert_eq!(destroy(v), Err(Error::InvalidArgs));
    }

    #[test]
    fn root_is_indestructible() {
        let _env = crate::test_util::env_lock();
        ensure_root();

        assert_eq!(destroy(Vmem::root()), Err(Error::AccessDenied));
    }

    #[test]
    fn spaces_are_isolated() {
        let _env = crate::test_util::env_lock();
        ensure_root();

        let v1 = create().unwrap();
        let v2 = create().unwrap();

        map(v1, ADDR, 0x99, PAGE_SIZE, true, false).unwrap();
        assert!(info(v1, ADDR).is_ok());
        // The mapping must not leak into the sibling space.
        assert_eq!(info(v2, ADDR), Err(Error::NotFound));

        unmap(v1, ADDR).unwrap();
        destroy(v1).unwrap();
        destroy(v2).unwrap();
    }

    #[test]
    fn map_reports_frame_back() {
        let _env = crate::test_util::env_lock();
        ensure_root();

        let v = create().unwrap();
        map(v, ADDR, 0x123, PAGE_SIZE, true, true).unwrap();

        let info_ = info(v, ADDR).unwrap();
        assert_eq!(info_.frame, 0x123);
        assert!(info_.mode.contains(AccessMode::WRITE));
        assert!(info_.mode.contains(AccessMode::EXEC));

        assert_eq!(unmap(v, ADDR), Ok(0x123));
        destroy(v).unwrap();
    }

    #[test]
    fn invalid_handles_are_rejected() {
        let _env = crate::test_util::env_lock();
        ensure_root();

        let stale = Vmem::from_raw(VMEM_MAX as u32);
        assert_eq!(unmap(stale, ADDR), Err(Error::InvalidArgs));
        assert_eq!(info(stale, ADDR), Err(Error::InvalidArgs));
        assert_eq!(destroy(stale), Err(Error::InvalidArgs));
    }
}
