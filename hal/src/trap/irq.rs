// SPDX-License-Identifier: MPL-2.0

use core::marker::PhantomData;

use crate::arch::irq;

/// Disables all IRQs on the current core.
///
/// The returned guard re-enables local IRQs when dropped, and only when the
/// outermost of a set of nested guards goes away.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled local IRQs.
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    phantom: PhantomData<*mut ()>,
}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = irq::is_local_enabled();
        if was_enabled {
            irq::disable_local();
        }
        Self {
            was_enabled,
            phantom: PhantomData,
        }
    }

    /// Transfers the saved IRQ status of this guard to a new guard.
    pub fn transfer_to(&mut self) -> Self {
        let was_enabled = self.was_enabled;
        self.was_enabled = false;
        Self {
            was_enabled,
            phantom: PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            irq::enable_local();
        }
    }
}
