// SPDX-License-Identifier: MPL-2.0

//! Page-level operations over a page directory.
//!
//! The `upage` family manipulates user-range leaf mappings; page tables are
//! allocated from the kernel pool on demand and handed back once their last
//! mapping is gone. `mmu_page_walk` is the reverse lookup used by fault
//! diagnostics.

use bitflags::bitflags;
use log::error;

use crate::{
    config::{PAGE_SHIFT, PAGE_SIZE, PGDIR_LENGTH, USER_BASE_VIRT, USER_END_VIRT},
    mm::{
        frame::{self, FrameNumber, FRAME_NULL},
        kpool,
        page_table::{pde_index, pte_index, PageDirectory, PageEntry, PageTable},
        paddr_to_vaddr, tlb, Paddr, Vaddr,
    },
    Error, Result,
};

bitflags! {
    /// Access permissions of a user page.
    pub struct AccessMode: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        AccessMode::empty()
    }
}

/// Information on a mapped user page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub frame: FrameNumber,
    pub mode: AccessMode,
}

fn user_vaddr_is_valid(vaddr: Vaddr) -> bool {
    vaddr % PAGE_SIZE == 0 && (USER_BASE_VIRT..USER_END_VIRT).contains(&vaddr)
}

/// Dereferences the page table a present directory entry points to.
///
/// # Safety
///
/// The entry must reference a live page-table page of the kernel pool.
unsafe fn pgtab_of<'a>(pde: &crate::arch::mm::PageDirectoryEntry) -> &'a mut PageTable {
    let paddr = (pde.frame() as Paddr) << PAGE_SHIFT;
    &mut *(paddr_to_vaddr(paddr) as *mut PageTable)
}

/// Installs `frame` at the user virtual address `vaddr`.
///
/// Allocates an intermediate page table when the covering directory entry
/// is absent. Fails with [`Error::Busy`] when `vaddr` is already mapped.
pub fn upage_map(
    pgdir: &mut PageDirectory,
    vaddr: Vaddr,
    frame: FrameNumber,
    w: bool,
    x: bool,
) -> Result<()> {
    if !user_vaddr_is_valid(vaddr) {
        error!("invalid user address {:#x}", vaddr);
        return Err(Error::InvalidArgs);
    }
    if !frame::frame_is_valid(frame) {
        error!("invalid frame {:#x}", frame);
        return Err(Error::InvalidArgs);
    }

    let pde = pgdir.entry_mut(pde_index(vaddr));
    if !pde.is_present() {
        let pgtab_vaddr = kpool::kpage_get(true)?;
        let pgtab_frame = (kpool::vaddr_to_paddr(pgtab_vaddr) >> PAGE_SHIFT) as FrameNumber;
        pde.set_frame(pgtab_frame)?;
        pde.set_user(true);
        pde.set_write(true);
        pde.set_present(true);
    }

    // SAFETY: the entry was just checked or made present, and user page
    // tables always come from the kernel pool.
    let pgtab = unsafe { pgtab_of(pde) };

    let pte = pgtab.entry_mut(pte_index(vaddr));
    if pte.is_present() {
        error!("address {:#x} is already mapped", vaddr);
        return Err(Error::Busy);
    }
    pte.set_frame(frame)?;
    pte.set_user(true);
    pte.set_write(w);
    pte.set_exec(x);
    pte.set_present(true);

    tlb::flush_address(vaddr);

    Ok(())
}

/// Removes the mapping at the user virtual address `vaddr`, returning the
/// frame that was installed there.
///
/// A page table whose last mapping goes away is handed back to the kernel
/// pool and its directory entry cleared.
pub fn upage_unmap(pgdir: &mut PageDirectory, vaddr: Vaddr) -> Result<FrameNumber> {
    if !user_vaddr_is_valid(vaddr) {
        error!("invalid user address {:#x}", vaddr);
        return Err(Error::InvalidArgs);
    }

    let pde = pgdir.entry_mut(pde_index(vaddr));
    if !pde.is_present() {
        return Err(Error::NotFound);
    }

    // SAFETY: present user directory entries reference pool-backed tables.
    let pgtab = unsafe { pgtab_of(pde) };

    let pte = pgtab.entry_mut(pte_index(vaddr));
    if !pte.is_present() {
        return Err(Error::NotFound);
    }

    let frame = pte.frame();
    pte.clear();
    tlb::flush_address(vaddr);

    if pgtab.is_empty() {
        let pgtab_vaddr = paddr_to_vaddr((pde.frame() as Paddr) << PAGE_SHIFT);
        pde.clear();
        kpool::kpage_put(pgtab_vaddr)?;
    }

    Ok(frame)
}

/// Allocates a frame and installs it at the user virtual address `vaddr`.
pub fn upage_alloc(pgdir: &mut PageDirectory, vaddr: Vaddr, w: bool, x: bool) -> Result<()> {
    let frame = frame::frame_alloc();
    if frame == FRAME_NULL {
        return Err(Error::NoMemory);
    }

    #[cfg(target_os = "none")]
    // SAFETY: the frame is freshly allocated and identity-reachable.
    unsafe {
        core::ptr::write_bytes(
            (((frame as Paddr) << PAGE_SHIFT) as *mut u8),
            0,
            PAGE_SIZE,
        );
    }

    if let Err(err) = upage_map(pgdir, vaddr, frame, w, x) {
        let _ = frame::frame_free(frame);
        return Err(err);
    }

    Ok(())
}

/// Changes the access permissions of the user page at `vaddr`.
pub fn upage_ctrl(pgdir: &mut PageDirectory, vaddr: Vaddr, mode: AccessMode) -> Result<()> {
    if !user_vaddr_is_valid(vaddr) {
        return Err(Error::InvalidArgs);
    }

    let pde = pgdir.entry_mut(pde_index(vaddr));
    if !pde.is_present() {
        return Err(Error::NotFound);
    }

    // SAFETY: present user directory entries reference pool-backed tables.
    let pgtab = unsafe { pgtab_of(pde) };

    let pte = pgtab.entry_mut(pte_index(vaddr));
    if !pte.is_present() {
        return Err(Error::NotFound);
    }

    pte.set_write(mode.contains(AccessMode::WRITE));
    pte.set_exec(mode.contains(AccessMode::EXEC));

    tlb::flush_address(vaddr);

    Ok(())
}

/// Reports the frame and permissions of the user page at `vaddr`.
pub fn upage_info(pgdir: &PageDirectory, vaddr: Vaddr) -> Result<PageInfo> {
    if !user_vaddr_is_valid(vaddr) {
        return Err(Error::InvalidArgs);
    }

    let pde = pgdir.entry(pde_index(vaddr));
    if !pde.is_present() {
        return Err(Error::NotFound);
    }

    // SAFETY: present user directory entries reference pool-backed tables.
    let pgtab = unsafe { pgtab_of(pde) };

    let pte = pgtab.entry(pte_index(vaddr));
    if !pte.is_present() {
        return Err(Error::NotFound);
    }

    let mut mode = AccessMode::READ;
    mode.set(AccessMode::WRITE, pte.is_write());
    mode.set(AccessMode::EXEC, pte.is_exec());

    Ok(PageInfo {
        frame: pte.frame(),
        mode,
    })
}

/// Finds the virtual address mapping the frame that contains `paddr`.
///
/// Linear search over the whole directory; the byte offset within the page
/// is preserved. Returns `None` when no leaf entry references the frame.
pub fn mmu_page_walk(pgdir: &PageDirectory, paddr: Paddr) -> Option<Vaddr> {
    let paddr_aligned = paddr & !(PAGE_SIZE - 1);
    let target = (paddr_aligned >> PAGE_SHIFT) as FrameNumber;

    for pde_idx in 0..PGDIR_LENGTH {
        let pde = pgdir.entry(pde_idx);
        if !pde.is_present() {
            continue;
        }

        // SAFETY: present directory entries reference pool-backed tables.
        let pgtab = unsafe { pgtab_of(pde) };

        for (pte_idx, pte) in pgtab.entries.iter().enumerate() {
            if !pte.is_present() || pte.frame() != target {
                continue;
            }
            let vaddr = (pde_idx << crate::config::PGTAB_SHIFT) | (pte_idx << PAGE_SHIFT);
            return Some(vaddr + (paddr - paddr_aligned));
        }
    }

    None
}

/// Maps the page at physical address `paddr` to `vaddr` inside `pgtab`.
///
/// Used while building the kernel address space; no user bit is set.
pub(crate) fn mmu_page_map(
    pgtab: &mut PageTable,
    paddr: Paddr,
    vaddr: Vaddr,
    w: bool,
    x: bool,
) -> Result<()> {
    if paddr % PAGE_SIZE != 0 || vaddr % PAGE_SIZE != 0 {
        return Err(Error::InvalidArgs);
    }

    let pte = pgtab.entry_mut(pte_index(vaddr));
    pte.clear();
    pte.set_frame((paddr >> PAGE_SHIFT) as FrameNumber)?;
    pte.set_write(w);
    pte.set_exec(x);
    pte.set_present(true);

    Ok(())
}

/// Hooks the page table at physical address `pgtab_paddr` into `pgdir` for
/// the region covering `vaddr`.
pub(crate) fn mmu_pgtab_map(
    pgdir: &mut PageDirectory,
    pgtab_paddr: Paddr,
    vaddr: Vaddr,
) -> Result<()> {
    if pgtab_paddr % PAGE_SIZE != 0 {
        return Err(Error::InvalidArgs);
    }

    let pde = pgdir.entry_mut(pde_index(vaddr));
    pde.clear();
    pde.set_frame((pgtab_paddr >> PAGE_SHIFT) as FrameNumber)?;
    pde.set_write(true);
    pde.set_present(true);

    Ok(())
}
