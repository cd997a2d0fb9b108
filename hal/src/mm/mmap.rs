// SPDX-License-Identifier: MPL-2.0

//! The boot memory-map registry.
//!
//! A small table the boot code fills in before the frame allocator comes
//! up. Entries may not overlap; the final map is printable and consumed
//! once.

use log::{error, info};

use crate::{mm::Paddr, sync::SpinLock, Error, Result};

/// Maximum number of entries in the memory map.
pub const MMAP_MAX_ENTRIES: usize = 16;

/// The type of a memory region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MmapType {
    /// Usable by the frame allocator.
    Available,
    /// Reserved by firmware or the platform; never allocated.
    Reserved,
    /// Known-bad memory; never allocated.
    BadRam,
}

impl MmapType {
    fn as_str(&self) -> &'static str {
        match self {
            MmapType::Available => "available",
            MmapType::BadRam => "malfunctioning",
            MmapType::Reserved => "reserved",
        }
    }
}

/// One region of the memory map.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MmapEntry {
    pub base: Paddr,
    pub size: usize,
    pub typ: MmapType,
}

pub(crate) struct Mmap {
    entries: [MmapEntry; MMAP_MAX_ENTRIES],
    count: usize,
}

impl Mmap {
    pub(crate) const fn new() -> Self {
        Self {
            entries: [MmapEntry {
                base: 0,
                size: 0,
                typ: MmapType::Reserved,
            }; MMAP_MAX_ENTRIES],
            count: 0,
        }
    }

    pub(crate) fn register(&mut self, base: Paddr, size: usize, typ: MmapType) -> Result<()> {
        if size == 0 {
            error!("invalid size (size={})", size);
            return Err(Error::InvalidArgs);
        }

        if self.count >= MMAP_MAX_ENTRIES {
            error!("too many regions registered");
            return Err(Error::NoMemory);
        }

        let end = base.checked_add(size).ok_or(Error::InvalidArgs)?;

        // Reject any overlap with a region that is already registered.
        for entry in &self.entries[..self.count] {
            let entry_end = entry.base + entry.size;
            if base < entry_end && end > entry.base {
                error!(
                    "new region would overlap with another one (base={:#x}, size={})",
                    base, size
                );
                return Err(Error::Busy);
            }
        }

        info!(
            "registering region (base={:#x}, size={}, type={})",
            base,
            size,
            typ.as_str()
        );

        self.entries[self.count] = MmapEntry { base, size, typ };
        self.count += 1;

        Ok(())
    }

    pub(crate) fn get(&self, index: usize) -> Result<MmapEntry> {
        if index >= self.count {
            error!("invalid index (index={})", index);
            return Err(Error::InvalidArgs);
        }
        Ok(self.entries[index])
    }
}

static MMAP: SpinLock<Mmap> = SpinLock::new(Mmap::new());

/// Registers a memory region that is available for use.
pub fn register_available(base: Paddr, size: usize) -> Result<()> {
    MMAP.lock_irq_disabled().register(base, size, MmapType::Available)
}

/// Registers a memory region that is reserved.
pub fn register_reserved(base: Paddr, size: usize) -> Result<()> {
    MMAP.lock_irq_disabled().register(base, size, MmapType::Reserved)
}

/// Registers a memory region that is malfunctioning.
pub fn register_erroneous(base: Paddr, size: usize) -> Result<()> {
    MMAP.lock_irq_disabled().register(base, size, MmapType::BadRam)
}

/// Returns the number of registered regions.
pub fn count() -> usize {
    MMAP.lock_irq_disabled().count
}

/// Gets a copy of the memory-map entry at `index`.
pub fn get(index: usize) -> Result<MmapEntry> {
    MMAP.lock_irq_disabled().get(index)
}

/// Returns a snapshot of the registered regions.
pub(crate) fn entries() -> impl Iterator<Item = MmapEntry> {
    let mmap = MMAP.lock_irq_disabled();
    let mut snapshot = [None; MMAP_MAX_ENTRIES];
    for (slot, entry) in snapshot.iter_mut().zip(&mmap.entries[..mmap.count]) {
        *slot = Some(*entry);
    }
    snapshot.into_iter().flatten()
}

/// Prints the contents of the memory map.
pub fn print() {
    info!("memory map:");
    for entry in entries() {
        info!(
            "base={:#x}, size={}, type={}",
            entry.base,
            entry.size,
            entry.typ.as_str()
        );
    }
}
