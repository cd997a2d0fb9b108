// SPDX-License-Identifier: MPL-2.0

//! TLB maintenance.
//!
//! Ports advertise one of two modes. Hardware-managed TLBs are refilled by
//! the page walker; write and invalidate are no-ops beyond the invalidation
//! the hardware needs. Software-managed TLBs keep a per-core shadow of the
//! architectural entries, and every insert goes through the shadow so the
//! two never diverge.

use crate::{
    arch,
    config::{CORES_NUM, PAGE_SHIFT},
    mm::{AccessMode, Paddr, Vaddr},
    sync::SpinLock,
    Error, Result,
};

/// How the port maintains its TLB.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TlbMode {
    /// The hardware walks page tables on a miss.
    Hardware,
    /// The kernel fills TLB entries itself.
    Software,
}

/// Which of the translation buffers an entry belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TlbWay {
    Data,
    Instruction,
}

/// Number of entries per way of the shadow.
pub const TLB_LENGTH: usize = 64;

/// One shadow entry, mirroring an architectural TLB slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlbEntry {
    pub valid: bool,
    pub vaddr: Vaddr,
    pub paddr: Paddr,
    pub shift: usize,
    pub prot: AccessMode,
}

/// The per-core shadow of a software-managed TLB.
pub struct ShadowTlb {
    data: [TlbEntry; TLB_LENGTH],
    inst: [TlbEntry; TLB_LENGTH],
}

impl ShadowTlb {
    pub const fn new() -> Self {
        const EMPTY: TlbEntry = TlbEntry {
            valid: false,
            vaddr: 0,
            paddr: 0,
            shift: 0,
            prot: AccessMode::empty(),
        };
        Self {
            data: [EMPTY; TLB_LENGTH],
            inst: [EMPTY; TLB_LENGTH],
        }
    }

    fn way(&self, way: TlbWay) -> &[TlbEntry; TLB_LENGTH] {
        match way {
            TlbWay::Data => &self.data,
            TlbWay::Instruction => &self.inst,
        }
    }

    fn way_mut(&mut self, way: TlbWay) -> &mut [TlbEntry; TLB_LENGTH] {
        match way {
            TlbWay::Data => &mut self.data,
            TlbWay::Instruction => &mut self.inst,
        }
    }

    fn index(vaddr: Vaddr, shift: usize) -> usize {
        (vaddr >> shift) % TLB_LENGTH
    }

    /// Writes an entry, mirroring it into hardware through `insert`.
    ///
    /// When the hardware insert fails the shadow is left untouched and the
    /// caller must retry.
    pub fn write_with(
        &mut self,
        way: TlbWay,
        vaddr: Vaddr,
        paddr: Paddr,
        shift: usize,
        prot: AccessMode,
        insert: impl FnOnce(&TlbEntry) -> bool,
    ) -> Result<()> {
        let entry = TlbEntry {
            valid: true,
            vaddr: vaddr & !((1 << shift) - 1),
            paddr: paddr & !((1 << shift) - 1),
            shift,
            prot,
        };

        if !insert(&entry) {
            return Err(Error::Again);
        }

        self.way_mut(way)[Self::index(vaddr, shift)] = entry;
        Ok(())
    }

    /// Writes an entry, mirroring it into the architectural TLB.
    pub fn write(
        &mut self,
        way: TlbWay,
        vaddr: Vaddr,
        paddr: Paddr,
        shift: usize,
        prot: AccessMode,
    ) -> Result<()> {
        self.write_with(way, vaddr, paddr, shift, prot, |_| true)
    }

    /// Invalidates the entry covering `vaddr`, if any.
    pub fn inval(&mut self, way: TlbWay, vaddr: Vaddr, shift: usize) -> Result<()> {
        let slot = &mut self.way_mut(way)[Self::index(vaddr, shift)];
        if slot.valid && slot.vaddr == vaddr & !((1 << shift) - 1) {
            slot.valid = false;
        }
        Ok(())
    }

    /// Clears the whole shadow.
    pub fn flush(&mut self) {
        for slot in self.data.iter_mut().chain(self.inst.iter_mut()) {
            slot.valid = false;
        }
    }

    /// Looks up the entry translating `vaddr`.
    pub fn lookup_vaddr(&self, way: TlbWay, vaddr: Vaddr) -> Option<TlbEntry> {
        self.way(way)
            .iter()
            .find(|e| {
                e.valid && e.vaddr == vaddr & !((1 << e.shift) - 1)
            })
            .copied()
    }

    /// Looks up the entry translating to `paddr`.
    pub fn lookup_paddr(&self, way: TlbWay, paddr: Paddr) -> Option<TlbEntry> {
        self.way(way)
            .iter()
            .find(|e| {
                e.valid && e.paddr == paddr & !((1 << e.shift) - 1)
            })
            .copied()
    }
}

/// The shadows of every core. Each core touches only its own slot; the
/// lock covers cross-core invalidation broadcasts.
static SHADOWS: [SpinLock<ShadowTlb>; CORES_NUM] = {
    const SHADOW: SpinLock<ShadowTlb> = SpinLock::new(ShadowTlb::new());
    [SHADOW; CORES_NUM]
};

/// Returns the TLB mode of the port.
pub fn mode() -> TlbMode {
    arch::tlb_mode()
}

/// Invalidates the translation of `vaddr` on the current core.
pub fn flush_address(vaddr: Vaddr) {
    match mode() {
        TlbMode::Hardware => arch::mm::tlb_flush_address(vaddr),
        TlbMode::Software => {
            let me = arch::core_id();
            let mut shadow = SHADOWS[me].lock_irq_disabled();
            let _ = shadow.inval(TlbWay::Data, vaddr, PAGE_SHIFT);
            let _ = shadow.inval(TlbWay::Instruction, vaddr, PAGE_SHIFT);
        }
    }
}

/// Flushes every translation cached on the current core.
pub fn flush_all() {
    match mode() {
        TlbMode::Hardware => arch::mm::tlb_flush_all(),
        TlbMode::Software => SHADOWS[arch::core_id()].lock_irq_disabled().flush(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_lookup() {
        let mut tlb = ShadowTlb::new();
        tlb.write(TlbWay::Data, 0x8000_1234, 0x42_0000, PAGE_SHIFT, AccessMode::READ)
            .unwrap();

        let entry = tlb.lookup_vaddr(TlbWay::Data, 0x8000_1000).unwrap();
        assert_eq!(entry.paddr, 0x42_0000);
        assert!(tlb.lookup_vaddr(TlbWay::Instruction, 0x8000_1000).is_none());
        assert!(tlb.lookup_paddr(TlbWay::Data, 0x42_0abc).is_some());
    }

    #[test]
    fn failed_hardware_insert_leaves_shadow_unchanged() {
        let mut tlb = ShadowTlb::new();
        let err = tlb.write_with(
            TlbWay::Data,
            0x8000_0000,
            0x1000,
            PAGE_SHIFT,
            AccessMode::READ,
            |_| false,
        );
        assert_eq!(err, Err(Error::Again));
        assert!(tlb.lookup_vaddr(TlbWay::Data, 0x8000_0000).is_none());
    }

    #[test]
    fn inval_drops_entry() {
        let mut tlb = ShadowTlb::new();
        tlb.write(TlbWay::Data, 0x8000_0000, 0x1000, PAGE_SHIFT, AccessMode::READ)
            .unwrap();
        tlb.inval(TlbWay::Data, 0x8000_0000, PAGE_SHIFT).unwrap();
        assert!(tlb.lookup_vaddr(TlbWay::Data, 0x8000_0000).is_none());
    }

    #[test]
    fn flush_clears_both_ways() {
        let mut tlb = ShadowTlb::new();
        tlb.write(TlbWay::Data, 0x8000_0000, 0x1000, PAGE_SHIFT, AccessMode::READ)
            .unwrap();
        tlb.write(TlbWay::Instruction, 0x8000_0000, 0x1000, PAGE_SHIFT, AccessMode::EXEC)
            .unwrap();
        tlb.flush();
        assert!(tlb.lookup_vaddr(TlbWay::Data, 0x8000_0000).is_none());
        assert!(tlb.lookup_vaddr(TlbWay::Instruction, 0x8000_0000).is_none());
    }
}
