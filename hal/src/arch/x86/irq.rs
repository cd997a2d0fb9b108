// SPDX-License-Identifier: MPL-2.0

//! Local IRQ flag control.

pub(crate) fn enable_local() {
    #[cfg(target_os = "none")]
    // SAFETY: re-enabling interrupts is sound outside of handler prologues.
    unsafe {
        x86::irq::enable();
    }
}

pub(crate) fn disable_local() {
    #[cfg(target_os = "none")]
    // SAFETY: disabling interrupts has no memory-safety impact.
    unsafe {
        x86::irq::disable();
    }
}

pub(crate) fn is_local_enabled() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            x86::bits64::rflags::read().contains(x86::bits64::rflags::RFlags::FLAGS_IF)
        } else {
            // The 32-bit build only runs on bare metal, where the flag
            // register is reachable through the trap frame alone; report
            // enabled so the guard always issues the `cli`.
            true
        }
    }
}
