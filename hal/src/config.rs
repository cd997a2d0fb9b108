// SPDX-License-Identifier: MPL-2.0

//! Compile-time configuration of the modeled machine.

#![allow(unused)]

use log::Level;

use crate::mm::{Paddr, Vaddr};

/// Shift of a page within the virtual address space.
pub const PAGE_SHIFT: usize = 12;
/// Size of a page (in bytes).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Shift of a page table within the virtual address space.
pub const PGTAB_SHIFT: usize = 22;
/// Size of the virtual range covered by one page table (in bytes).
pub const PGTAB_SIZE: usize = 1 << PGTAB_SHIFT;
/// Width of a virtual address (in bits).
pub const VADDR_BIT: usize = 32;

/// Number of entries in a page directory.
pub const PGDIR_LENGTH: usize = 1 << (VADDR_BIT - PGTAB_SHIFT);
/// Number of entries in a page table.
pub const PGTAB_LENGTH: usize = 1 << (PGTAB_SHIFT - PAGE_SHIFT);
/// Width of the frame number field of a page-table entry (in bits).
pub const FRAME_BITS: usize = VADDR_BIT - PAGE_SHIFT;

/// Size of the physical memory (in bytes).
pub const MEMORY_SIZE: usize = 128 << 20;
/// Total number of page frames.
pub const NUM_FRAMES: usize = MEMORY_SIZE / PAGE_SIZE;

/// Base physical address of the kernel image.
pub const KERNEL_BASE_PHYS: Paddr = 0x0000_0000;
/// End physical address of the kernel image.
pub const KERNEL_END_PHYS: Paddr = 0x0040_0000;
/// Base physical address of the kernel page pool.
pub const KPOOL_BASE_PHYS: Paddr = 0x0040_0000;
/// End physical address of the kernel page pool.
pub const KPOOL_END_PHYS: Paddr = 0x0080_0000;

/// Size of the kernel-resident memory (in bytes).
pub const KMEM_SIZE: usize = KERNEL_END_PHYS - KERNEL_BASE_PHYS;
/// Size of the kernel page pool (in bytes).
pub const KPOOL_SIZE: usize = KPOOL_END_PHYS - KPOOL_BASE_PHYS;
/// Number of pages in the kernel page pool.
pub const NUM_KPAGES: usize = KPOOL_SIZE / PAGE_SIZE;
/// Number of page frames available to user space.
pub const NUM_UFRAMES: usize = (MEMORY_SIZE - KMEM_SIZE - KPOOL_SIZE) / PAGE_SIZE;

/// Base virtual address of user space. Must be page-table aligned.
pub const USER_BASE_VIRT: Vaddr = 0x8000_0000;
/// End virtual address of user space. Must be page-table aligned.
pub const USER_END_VIRT: Vaddr = 0xc000_0000;

/// Maximum number of virtual memory spaces.
pub const VMEM_MAX: usize = 16;

/// Number of exception lines.
pub const EXCEPTIONS_NUM: usize = 32;
/// Number of hardware interrupt lines.
pub const INTERRUPTS_NUM: usize = 16;
/// Interrupt line wired to the system timer.
pub const INTERRUPT_TIMER: usize = 0;
/// Default-handler invocations tolerated before a warning is logged.
pub const INTERRUPT_SPURIOUS_THRESHOLD: u32 = 100;
/// Vector at which hardware interrupts are remapped.
pub const HWINT_OFFSET: u8 = 32;
/// Vector of the kernel-call trap gate.
pub const TRAP_GATE: u8 = 0x80;

/// Number of cores of the modeled machine.
pub const CORES_NUM: usize = 8;

/// Size of the kernel heap (in bytes).
pub const KERNEL_HEAP_SIZE: usize = PAGE_SIZE * 256;

/// Boot-time log level.
pub const DEFAULT_LOG_LEVEL: Level = Level::Info;

const_assert!(USER_BASE_VIRT % PGTAB_SIZE == 0);
const_assert!(USER_END_VIRT % PGTAB_SIZE == 0);
const_assert!(KPOOL_BASE_PHYS % PAGE_SIZE == 0);
const_assert!(NUM_FRAMES % (usize::BITS as usize) == 0);
