// SPDX-License-Identifier: MPL-2.0

//! The root address space.
//!
//! Built once at boot: the kernel image and the kernel page pool are
//! identity-mapped through page tables carved out of the pool itself, the
//! layout is sanity-checked, and the resulting directory becomes the root
//! virtual memory space.

use log::info;

use crate::{
    config::{
        KERNEL_BASE_PHYS, KERNEL_END_PHYS, KPOOL_BASE_PHYS, KPOOL_END_PHYS, KPOOL_SIZE,
        KMEM_SIZE, PAGE_SIZE, PGTAB_SIZE, USER_BASE_VIRT, USER_END_VIRT,
    },
    mm::{
        kpool,
        page::{mmu_page_map, mmu_pgtab_map},
        page_table::{PageDirectory, PageTable},
        Paddr, Vaddr,
    },
};

struct MemRegion {
    desc: &'static str,
    pbase: Paddr,
    pend: Paddr,
    writable: bool,
    executable: bool,
}

/// The physical regions the root space identity-maps.
const MEM_LAYOUT: [MemRegion; 2] = [
    MemRegion {
        desc: "kernel",
        pbase: KERNEL_BASE_PHYS,
        pend: KERNEL_END_PHYS,
        writable: true,
        executable: true,
    },
    MemRegion {
        desc: "kpool",
        pbase: KPOOL_BASE_PHYS,
        pend: KPOOL_END_PHYS,
        writable: true,
        executable: false,
    },
];

fn memory_info() {
    const KB: usize = 1024;
    for region in &MEM_LAYOUT {
        info!(
            "{}_base={:#x} {}_end={:#x}",
            region.desc, region.pbase, region.desc, region.pend
        );
    }
    info!(
        "user_base={:#x} user_end={:#x}",
        USER_BASE_VIRT, USER_END_VIRT
    );
    info!(
        "kmem={} KB kpool={} KB",
        KMEM_SIZE / KB,
        KPOOL_SIZE / KB
    );
}

fn memory_check_align() {
    for region in &MEM_LAYOUT {
        if region.pbase % PGTAB_SIZE != 0 {
            panic!("{} base address misaligned", region.desc);
        }
        if region.pend % PAGE_SIZE != 0 {
            panic!("{} end address misaligned", region.desc);
        }
    }
    if USER_BASE_VIRT % PGTAB_SIZE != 0 {
        panic!("user base address misaligned");
    }
    if USER_END_VIRT % PGTAB_SIZE != 0 {
        panic!("user end address misaligned");
    }
}

/// Builds the root address space, returning the root directory.
pub(crate) fn init() -> Vaddr {
    info!("initializing memory layout...");

    memory_info();
    memory_check_align();

    let pgdir_vaddr = kpool::kpage_get(true).expect("no page for the root directory");
    // SAFETY: the page just became exclusively ours and stays allocated
    // for the kernel lifetime.
    let pgdir = unsafe { &mut *(pgdir_vaddr as *mut PageDirectory) };

    for region in &MEM_LAYOUT {
        let mut addr = region.pbase;
        while addr < region.pend {
            let pgtab_vaddr = kpool::kpage_get(true).expect("no page for a root page table");
            // SAFETY: same as above.
            let pgtab = unsafe { &mut *(pgtab_vaddr as *mut PageTable) };

            let span_end = region.pend.min(addr + PGTAB_SIZE);
            let mut page = addr;
            while page < span_end {
                mmu_page_map(pgtab, page, page, region.writable, region.executable)
                    .expect("failed to map a kernel page");
                page += PAGE_SIZE;
            }

            mmu_pgtab_map(pgdir, kpool::vaddr_to_paddr(pgtab_vaddr), addr)
                .expect("failed to hook a kernel page table");

            addr = span_end;
        }
    }

    // Switch to the fresh address space; from here on the identity
    // mappings carry every kernel access.
    #[cfg(target_os = "none")]
    crate::arch::mm::tlb_load(kpool::vaddr_to_paddr(pgdir_vaddr));

    pgdir_vaddr
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mm::page::mmu_page_walk;
    use crate::mm::page_table::{pde_index, PageEntry};

    #[test]
    fn root_space_identity_maps_kernel_regions() {
        let _env = crate::test_util::env_lock();

        let pgdir_vaddr = init();
        // SAFETY: the directory was just built and nothing else holds it.
        let pgdir = unsafe { &*(pgdir_vaddr as *const PageDirectory) };

        assert!(pgdir.entry(pde_index(KERNEL_BASE_PHYS)).is_present());
        assert!(pgdir.entry(pde_index(KPOOL_BASE_PHYS)).is_present());
        assert!(!pgdir.entry(pde_index(USER_BASE_VIRT)).is_present());

        // Identity: a physical address inside the kernel window walks back
        // to itself.
        let probe = KERNEL_BASE_PHYS + 0x1234;
        assert_eq!(mmu_page_walk(pgdir, probe), Some(probe));
        let probe = KPOOL_BASE_PHYS + 0x2000;
        assert_eq!(mmu_page_walk(pgdir, probe), Some(probe));
    }
}
