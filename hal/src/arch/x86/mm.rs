// SPDX-License-Identifier: MPL-2.0

//! MMU primitives of the port: 32-bit two-level paging.

use bitflags::bitflags;

use crate::{
    config::FRAME_BITS,
    mm::{
        page_table::PageEntry,
        tlb::TlbMode,
        FrameNumber, Paddr, Vaddr,
    },
    Error, Result,
};

bitflags! {
    /// Capability bits of a page-table or page-directory entry.
    struct EntryFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
        /// Software bit: the page may be executed. The port has no
        /// hardware no-execute, so the bit lives in an ignored slot.
        const EXEC     = 1 << 9;
    }
}

/// Mask of the frame number field.
const FRAME_MASK: u32 = !((1 << 12) - 1);

macro_rules! impl_page_entry {
    ($name: ident) => {
        impl PageEntry for $name {
            fn clear(&mut self) {
                self.0 = 0;
            }

            fn is_present(&self) -> bool {
                self.flags().contains(EntryFlags::PRESENT)
            }

            fn set_present(&mut self, present: bool) {
                self.update(EntryFlags::PRESENT, present);
            }

            fn frame(&self) -> FrameNumber {
                (self.0 & FRAME_MASK) >> 12
            }

            fn set_frame(&mut self, frame: FrameNumber) -> Result<()> {
                if frame >= (1 << FRAME_BITS) {
                    return Err(Error::InvalidArgs);
                }
                self.0 = (self.0 & !FRAME_MASK) | (frame << 12);
                Ok(())
            }

            fn is_user(&self) -> bool {
                self.flags().contains(EntryFlags::USER)
            }

            fn set_user(&mut self, user: bool) {
                self.update(EntryFlags::USER, user);
            }

            fn is_write(&self) -> bool {
                self.flags().contains(EntryFlags::WRITABLE)
            }

            fn set_write(&mut self, write: bool) {
                self.update(EntryFlags::WRITABLE, write);
            }

            fn is_read(&self) -> bool {
                // Every present mapping of the port is readable.
                true
            }

            fn set_read(&mut self, _read: bool) {}

            fn is_exec(&self) -> bool {
                self.flags().contains(EntryFlags::EXEC)
            }

            fn set_exec(&mut self, exec: bool) {
                self.update(EntryFlags::EXEC, exec);
            }

            fn is_accessed(&self) -> bool {
                self.flags().contains(EntryFlags::ACCESSED)
            }

            fn is_dirty(&self) -> bool {
                self.flags().contains(EntryFlags::DIRTY)
            }
        }

        impl $name {
            fn flags(&self) -> EntryFlags {
                EntryFlags::from_bits_truncate(self.0)
            }

            fn update(&mut self, flag: EntryFlags, value: bool) {
                let mut flags = self.flags();
                flags.set(flag, value);
                self.0 = (self.0 & FRAME_MASK) | flags.bits();
            }
        }
    };
}

/// A page-table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

/// A page-directory entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageDirectoryEntry(u32);

impl_page_entry!(PageTableEntry);
impl_page_entry!(PageDirectoryEntry);

assert_eq_size!(PageTableEntry, u32);
assert_eq_size!(PageDirectoryEntry, u32);

/// The TLB of the port is walked by hardware.
pub const fn tlb_mode() -> TlbMode {
    TlbMode::Hardware
}

/// Invalidates the cached translation of `vaddr` on the current core.
pub fn tlb_flush_address(_vaddr: Vaddr) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: invalidating a translation cannot break memory safety.
    unsafe {
        core::arch::asm!("invlpg ({0})", in(reg) _vaddr, options(att_syntax, nostack));
    }
}

/// Flushes every non-global translation on the current core.
pub fn tlb_flush_all() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: reloading cr3 with its own value only drops cached entries.
    unsafe {
        let cr3: u32;
        core::arch::asm!("mov %cr3, {0}", out(reg) cr3, options(att_syntax, nostack));
        core::arch::asm!("mov {0}, %cr3", in(reg) cr3, options(att_syntax, nostack));
    }
}

/// Loads the address space rooted at physical address `pgdir`.
pub fn tlb_load(_pgdir: Paddr) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: the caller hands over a fully built root page directory.
    unsafe {
        core::arch::asm!("mov {0}, %cr3", in(reg) _pgdir as u32, options(att_syntax, nostack));
    }
}

/// Returns the faulting address of the last page fault on this core.
pub fn page_fault_addr() -> Vaddr {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86", target_os = "none"))] {
            let cr2: u32;
            // SAFETY: reading cr2 has no side effects.
            unsafe {
                core::arch::asm!("mov %cr2, {0}", out(reg) cr2, options(att_syntax, nostack));
            }
            cr2 as Vaddr
        } else {
            0
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_bits_read_back() {
        let mut pte = PageTableEntry::default();
        assert!(!pte.is_present());

        pte.set_present(true);
        assert!(pte.is_present());
        pte.set_user(true);
        assert!(pte.is_user());
        pte.set_write(true);
        assert!(pte.is_write());
        pte.set_exec(true);
        assert!(pte.is_exec());

        pte.set_write(false);
        assert!(!pte.is_write());
        assert!(pte.is_present());

        pte.clear();
        assert!(!pte.is_present());
        assert!(!pte.is_user());
        assert_eq!(pte.frame(), 0);
    }

    #[test]
    fn frame_field_round_trip() {
        let mut pde = PageDirectoryEntry::default();
        for frame in [0u32, 1, 0x42, (1 << FRAME_BITS) - 1] {
            pde.set_frame(frame).unwrap();
            assert_eq!(pde.frame(), frame);
        }
    }

    #[test]
    fn frame_field_rejects_overflow() {
        let mut pte = PageTableEntry::default();
        assert_eq!(pte.set_frame(1 << FRAME_BITS), Err(Error::InvalidArgs));
    }

    #[test]
    fn frame_and_flags_are_independent() {
        let mut pte = PageTableEntry::default();
        pte.set_frame(0x42).unwrap();
        pte.set_present(true);
        pte.set_user(true);
        assert_eq!(pte.frame(), 0x42);
        pte.set_frame(0x17).unwrap();
        assert!(pte.is_present());
        assert!(pte.is_user());
    }

    #[test]
    fn read_is_always_on() {
        let mut pte = PageTableEntry::default();
        assert!(pte.is_read());
        pte.set_read(false);
        assert!(pte.is_read());
    }
}
