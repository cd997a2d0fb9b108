// SPDX-License-Identifier: MPL-2.0

//! The IO APIC.
//!
//! One IO APIC distributes the external interrupt lines across cores. The
//! redirection table is programmed physical-destination, edge-triggered,
//! fixed-delivery, with vectors identity-offset from the remap base.

use bit_field::BitField;
use log::{error, info};

use crate::{
    config::HWINT_OFFSET,
    sync::{Once, SpinLock},
    Error, Result,
};

/// Register-select/data window layout.
const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;

/// Register numbers.
const IOAPIC_REG_ID: u8 = 0x00;
const IOAPIC_REG_VERSION: u8 = 0x01;
const IOAPIC_REG_REDTBL_BASE: u8 = 0x10;

/// In physical destination mode only the low four bits of the destination
/// field are interpreted; the datasheet leaves the rest unclear.
const MAXIMUM_NUMBER_CPUS: u8 = 16;

struct IoApicAccess {
    register: *mut u32,
    data: *mut u32,
}

// SAFETY: accesses are serialized by the lock around `IoApic`.
unsafe impl Send for IoApicAccess {}

impl IoApicAccess {
    /// # Safety
    ///
    /// `base` must be the virtual address of an IO APIC register window.
    unsafe fn new(base: usize) -> Self {
        Self {
            register: base as *mut u32,
            data: (base + IOWIN) as *mut u32,
        }
    }

    fn read(&mut self, register: u8) -> u32 {
        // SAFETY: the window was vouched for at construction.
        unsafe {
            self.register.write_volatile(register as u32);
            self.data.read_volatile()
        }
    }

    fn write(&mut self, register: u8, value: u32) {
        // SAFETY: the window was vouched for at construction.
        unsafe {
            self.register.write_volatile(register as u32);
            self.data.write_volatile(value);
        }
    }
}

struct IoApic {
    access: IoApicAccess,
    id: u8,
    gsi_base: u32,
}

impl IoApic {
    fn id(&mut self) -> u8 {
        self.access.read(IOAPIC_REG_ID).get_bits(24..28) as u8
    }

    fn max_redirection_entry(&mut self) -> u8 {
        self.access.read(IOAPIC_REG_VERSION).get_bits(16..24) as u8 + 1
    }

    fn enable(&mut self, irq: u8, cpu: u8) -> Result<()> {
        if irq >= self.max_redirection_entry() {
            error!("invalid irq number (irq={})", irq);
            return Err(Error::InvalidArgs);
        }
        if cpu > MAXIMUM_NUMBER_CPUS {
            error!("invalid cpu number (cpu={})", cpu);
            return Err(Error::InvalidArgs);
        }

        // Physical destination, high active, edge triggered, unmasked,
        // fixed delivery; the vector is the identity-offset interrupt line.
        self.access.write(
            IOAPIC_REG_REDTBL_BASE + 2 * irq + 1,
            (cpu as u32) << 24,
        );
        self.access
            .write(IOAPIC_REG_REDTBL_BASE + 2 * irq, (HWINT_OFFSET + irq) as u32);

        Ok(())
    }
}

static IOAPIC: Once<SpinLock<IoApic>> = Once::new();

/// Initializes the IO APIC from the descriptor the MADT reported.
///
/// Fails with [`Error::Busy`] on a second initialization.
pub(crate) fn init(id: u8, addr: usize, gsi_base: u32) -> Result<()> {
    if IOAPIC.get().is_some() {
        error!("ioapic is already initialized");
        return Err(Error::Busy);
    }

    info!("initializing ioapic (id={}, addr={:#x}, gsi={})", id, addr, gsi_base);

    IOAPIC.call_once(|| {
        // SAFETY: the MADT reported this window; the kernel address space
        // identity-maps the platform MMIO ranges.
        let access = unsafe { IoApicAccess::new(addr) };
        SpinLock::new(IoApic {
            access,
            id,
            gsi_base,
        })
    });

    Ok(())
}

/// Routes the interrupt line `irq` to `cpu`.
pub(crate) fn enable(irq: u8, cpu: u8) -> Result<()> {
    let ioapic = IOAPIC.get().ok_or(Error::NotFound)?;
    ioapic.lock_irq_disabled().enable(irq, cpu)
}

#[cfg(test)]
mod test {
    use super::*;

    /// A page-sized stand-in for the register window. Reads land on the
    /// data cell, which the test seeds with a version register image.
    #[repr(align(4096))]
    struct FakeWindow([u8; 4096]);

    fn fake_ioapic(maxredir: u8) -> IoApic {
        let window = Box::leak(Box::new(FakeWindow([0; 4096])));
        let base = window.0.as_ptr() as usize;
        // Seed the data cell so version reads report `maxredir` entries.
        let version = ((maxredir as u32 - 1) << 16) | 0x11;
        // SAFETY: the fake window is a live allocation.
        unsafe {
            ((base + IOWIN) as *mut u32).write_volatile(version);
        }
        IoApic {
            // SAFETY: same.
            access: unsafe { IoApicAccess::new(base) },
            id: 0,
            gsi_base: 0,
        }
    }

    #[test]
    fn enable_rejects_out_of_range_irq() {
        let mut ioapic = fake_ioapic(24);
        // The bound is `maxredir` itself, not `maxredir - 1`.
        assert_eq!(ioapic.enable(24, 0), Err(Error::InvalidArgs));
        assert_eq!(ioapic.enable(200, 0), Err(Error::InvalidArgs));
    }

    #[test]
    fn enable_rejects_out_of_range_cpu() {
        let mut ioapic = fake_ioapic(24);
        assert_eq!(ioapic.enable(1, 17), Err(Error::InvalidArgs));
        assert_eq!(ioapic.enable(1, 16), Ok(()));
    }

    #[test]
    fn enable_programs_identity_vector() {
        let mut ioapic = fake_ioapic(24);
        ioapic.enable(4, 1).unwrap();
        // The low redirection word was the last write; it must carry the
        // identity-offset vector.
        let base = ioapic.access.data as usize - IOWIN;
        // SAFETY: reading back the fake window.
        let low = unsafe { ((base + IOWIN) as *const u32).read_volatile() };
        assert_eq!(low, (HWINT_OFFSET + 4) as u32);
    }
}
