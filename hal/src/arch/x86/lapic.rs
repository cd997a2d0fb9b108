// SPDX-License-Identifier: MPL-2.0

//! The local APIC of each core, driven through its xAPIC MMIO window.

use crate::sync::{Once, SpinLock};

/// Register offsets within the 4 KiB xAPIC window.
const XAPIC_ID: u32 = 0x020;
const XAPIC_VERSION: u32 = 0x030;
const XAPIC_EOI: u32 = 0x0b0;
const XAPIC_SVR: u32 = 0x0f0;
const XAPIC_ICR_LOW: u32 = 0x300;
const XAPIC_ICR_HIGH: u32 = 0x310;

/// Default physical base of the xAPIC window.
const XAPIC_BASE: usize = 0xfee0_0000;

pub(crate) struct Lapic {
    mmio: *mut u32,
}

// SAFETY: the window is per-core; accesses are serialized by the lock below.
unsafe impl Send for Lapic {}

static LAPIC: Once<SpinLock<Lapic>> = Once::new();

impl Lapic {
    /// # Safety
    ///
    /// `base` must be the virtual address of the local APIC window.
    unsafe fn new(base: usize) -> Self {
        Self {
            mmio: base as *mut u32,
        }
    }

    fn read(&self, offset: u32) -> u32 {
        debug_assert_eq!(offset % 4, 0);
        // SAFETY: the offset stays within the register window.
        unsafe { self.mmio.add((offset / 4) as usize).read_volatile() }
    }

    fn write(&mut self, offset: u32, value: u32) {
        debug_assert_eq!(offset % 4, 0);
        // SAFETY: the offset stays within the register window.
        unsafe { self.mmio.add((offset / 4) as usize).write_volatile(value) }
    }

    fn enable(&mut self) {
        // Software-enable the APIC and park the spurious vector on 0xff.
        self.write(XAPIC_SVR, (1 << 8) | 0xff);
    }

    fn id(&self) -> u32 {
        self.read(XAPIC_ID) >> 24
    }

    fn eoi(&mut self) {
        self.write(XAPIC_EOI, 0);
    }

    fn send_ipi(&mut self, icr: Icr) {
        // The write to the low doubleword triggers the send, so the high
        // one must land first.
        self.write(XAPIC_ICR_HIGH, icr.upper());
        self.write(XAPIC_ICR_LOW, icr.lower());
    }
}

/// The inter-processor interrupt control register.
///
/// - Bit 0-7: vector
/// - Bit 8-10: delivery mode
/// - Bit 11: destination mode (0 = physical)
/// - Bit 14: level assert
/// - Bit 15: trigger mode
/// - Bit 56-63: destination APIC id
pub(crate) struct Icr(u64);

#[repr(u64)]
#[derive(Clone, Copy)]
pub(crate) enum DeliveryMode {
    Fixed = 0b000,
    Init = 0b101,
    StartUp = 0b110,
}

impl Icr {
    pub(crate) fn new(destination: u8, delivery_mode: DeliveryMode, vector: u8) -> Self {
        Icr(((destination as u64) << 56)
            | (1 << 14)
            | ((delivery_mode as u64) << 8)
            | vector as u64)
    }

    pub(crate) fn lower(&self) -> u32 {
        self.0 as u32
    }

    pub(crate) fn upper(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Initializes the local APIC of the calling core.
pub(crate) fn init() {
    LAPIC.call_once(|| {
        // SAFETY: the architectural default base is identity-mapped in the
        // kernel address space.
        let mut lapic = unsafe { Lapic::new(XAPIC_BASE) };
        lapic.enable();
        SpinLock::new(lapic)
    });
}

/// Returns the local APIC id of the calling core.
pub(crate) fn id() -> u32 {
    LAPIC.get().map(|l| l.lock_irq_disabled().id()).unwrap_or(0)
}

/// Signals end-of-interrupt to the local APIC.
pub(crate) fn eoi() {
    if let Some(lapic) = LAPIC.get() {
        lapic.lock_irq_disabled().eoi();
    }
}

/// Sends an INIT/SIPI sequence to the core whose APIC id is `apic_id`.
///
/// `entry_frame` is the page-frame number of the real-mode startup code.
pub(crate) fn send_startup(apic_id: u8, entry_frame: u8) {
    if let Some(lapic) = LAPIC.get() {
        let mut lapic = lapic.lock_irq_disabled();
        lapic.send_ipi(Icr::new(apic_id, DeliveryMode::Init, 0));
        lapic.send_ipi(Icr::new(apic_id, DeliveryMode::StartUp, entry_frame));
        lapic.send_ipi(Icr::new(apic_id, DeliveryMode::StartUp, entry_frame));
    }
}

/// Sends a fixed IPI carrying `vector` to the core whose APIC id is `apic_id`.
pub(crate) fn send_fixed(apic_id: u8, vector: u8) {
    if let Some(lapic) = LAPIC.get() {
        lapic
            .lock_irq_disabled()
            .send_ipi(Icr::new(apic_id, DeliveryMode::Fixed, vector));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn icr_field_packing() {
        let icr = Icr::new(3, DeliveryMode::StartUp, 0x42);
        assert_eq!(icr.upper() >> 24, 3);
        assert_eq!(icr.lower() & 0xff, 0x42);
        assert_eq!((icr.lower() >> 8) & 0x7, DeliveryMode::StartUp as u32);
        // Level assert is always set for the startup protocol.
        assert_ne!(icr.lower() & (1 << 14), 0);
    }
}
