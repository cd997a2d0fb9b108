// SPDX-License-Identifier: MPL-2.0

//! Application-core startup and control.

use crate::config::PAGE_SHIFT;

use super::{lapic, madt};

/// Physical page holding the real-mode startup code of the application
/// cores. Must lie below 1 MiB.
const AP_BOOT_PHYS: usize = 0x8000;

/// Resolves the local APIC id of a core index, falling back to the index
/// itself when the platform tables went unreported.
fn apic_id_of(core_id: usize) -> u8 {
    madt::info()
        .and_then(|info| info.lapics.get(core_id))
        .map(|lapic| lapic.apic_id as u8)
        .unwrap_or(core_id as u8)
}

/// Kicks core `core_id` out of reset.
///
/// The per-core slot must have been published (and flushed) beforehand;
/// the INIT/SIPI pair lands the core in the boot stub, which reads it.
pub(crate) fn kick(core_id: usize) {
    lapic::send_startup(apic_id_of(core_id), (AP_BOOT_PHYS >> PAGE_SHIFT) as u8);
}

/// Pokes a sleeping core with a fixed wakeup IPI.
pub(crate) fn notify(core_id: usize) {
    const WAKEUP_VECTOR: u8 = 0xf0;
    lapic::send_fixed(apic_id_of(core_id), WAKEUP_VECTOR);
}

/// Waits for work with interrupts open.
pub(crate) fn wait() {
    #[cfg(target_os = "none")]
    // SAFETY: a halted core resumes on the next interrupt.
    unsafe {
        x86::irq::enable();
        x86::halt();
    }
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}

/// Puts the calling core back into its reset state.
pub(crate) fn reset() -> ! {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "none")] {
            super::irq::disable_local();
            loop {
                // SAFETY: the core parks with IRQs off until a startup IPI.
                unsafe { x86::halt() };
            }
        } else {
            panic!("core reset on a hosted build");
        }
    }
}
