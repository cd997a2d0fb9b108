// SPDX-License-Identifier: MPL-2.0

//! The x86 port.
//!
//! Models a multi-core protected-mode machine: two-level 32-bit paging, the
//! legacy 8259 PIC pair for prioritized IRQ delivery, one IO APIC plus
//! per-core local APICs for routing and startup IPIs, and an `int 0x80`
//! trap gate for kernel calls.

mod ctx;
mod device;
pub(crate) mod idt;
pub(crate) mod ioapic;
pub(crate) mod irq;
pub(crate) mod lapic;
pub(crate) mod madt;
pub mod mm;
pub(crate) mod pic;
pub(crate) mod serial;
pub(crate) mod smp;
mod trampoline;

pub use self::ctx::{context_switch, Context, TaskContext};
pub use self::mm::tlb_mode;
pub use self::pic::IrqLevel;
pub use self::trampoline::{set_kcall_entry, KcallEntry};

/// Acknowledges the interrupt request line `irq` at every controller that
/// took part in delivering it.
pub(crate) fn interrupts_ack(irq: u8) {
    pic::ack(irq);
    lapic::eoi();
}

/// Polls the interrupt controller for the next pending request line.
pub(crate) fn interrupts_next() -> Option<u8> {
    pic::next()
}

/// Masks the interrupt request line `irq`.
pub(crate) fn interrupts_mask(irq: u8) -> crate::Result<()> {
    pic::mask(irq)
}

/// Unmasks the interrupt request line `irq`.
pub(crate) fn interrupts_unmask(irq: u8) -> crate::Result<()> {
    pic::unmask(irq)
}

/// Sets the interrupt level, returning the previous one.
pub fn interrupts_lvl_set(level: IrqLevel) -> IrqLevel {
    pic::lvl_set(level)
}

/// Code-segment selector of the flat kernel segment.
pub const KERNEL_CS: u16 = 0x8;

/// Brings up the architectural state of the boot core.
pub(crate) fn init() {
    crate::console::init();
    #[cfg(target_os = "none")]
    {
        idt::init(KERNEL_CS);
        pic::init(crate::config::HWINT_OFFSET);
        lapic::init();
    }
    #[cfg(not(target_os = "none"))]
    {
        pic::init(crate::config::HWINT_OFFSET);
    }
}

/// Returns the index of the core executing the caller.
pub fn core_id() -> usize {
    #[cfg(target_os = "none")]
    {
        lapic::id() as usize
    }
    #[cfg(not(target_os = "none"))]
    {
        0
    }
}

/// Halts the machine.
pub fn shutdown() -> ! {
    #[cfg(target_os = "none")]
    {
        irq::disable_local();
        loop {
            // SAFETY: halting with IRQs disabled stops the core for good.
            unsafe { x86::halt() };
        }
    }
    #[cfg(not(target_os = "none"))]
    panic!("shutdown requested");
}

/// Orders all memory operations issued by this core before the ones of any
/// core that observes a subsequent store.
pub fn memory_barrier() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}
