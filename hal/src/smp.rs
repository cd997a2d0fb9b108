// SPDX-License-Identifier: MPL-2.0

//! Per-core bootstrap, sleep and wakeup.
//!
//! Every core owns one cache-line-padded slot. The initiator writes the
//! slot under its lock, publishes with a full barrier, and only then kicks
//! the target; the target reads the slot from its boot stub.

use log::{error, info};

use crate::{arch, config::CORES_NUM, sync::SpinLock, Error, Result};

/// Execution state of a core.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoreState {
    /// Parked in the boot stub, waiting for work.
    Idle,
    /// A start routine was published; the core has not picked it up yet.
    Starting,
    /// Running kernel code.
    Running,
    /// Voluntarily suspended; a wakeup brings it back.
    Sleeping,
}

struct CoreInfo {
    state: CoreState,
    start: Option<fn()>,
}

/// One bootstrap slot, padded out to its own cache line.
#[repr(align(64))]
struct CoreSlot {
    inner: SpinLock<CoreInfo>,
}

impl CoreSlot {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(CoreInfo {
                state: CoreState::Idle,
                start: None,
            }),
        }
    }
}

static CORES: [CoreSlot; CORES_NUM] = {
    const SLOT: CoreSlot = CoreSlot::new();
    [SLOT; CORES_NUM]
};

/// Marks the boot core as running.
pub(crate) fn init() {
    let boot = arch::core_id();
    CORES[boot].inner.lock_irq_disabled().state = CoreState::Running;
    info!("boot core {} online", boot);
}

/// Returns the index of the calling core.
pub fn core_id() -> usize {
    arch::core_id()
}

/// Returns the state of core `core_id`.
pub fn core_state(core_id: usize) -> Result<CoreState> {
    let slot = CORES.get(core_id).ok_or(Error::InvalidArgs)?;
    Ok(slot.inner.lock_irq_disabled().state)
}

/// Starts core `core_id` on `entry`.
///
/// Fails with [`Error::Busy`] unless the target is idle.
pub fn core_start(core_id: usize, entry: fn()) -> Result<()> {
    let slot = CORES.get(core_id).ok_or_else(|| {
        error!("invalid core {}", core_id);
        Error::InvalidArgs
    })?;

    {
        let mut info = slot.inner.lock_irq_disabled();
        if info.state != CoreState::Idle {
            error!("core {} is not idle", core_id);
            return Err(Error::Busy);
        }
        info.state = CoreState::Starting;
        info.start = Some(entry);
    }

    // The slot must be visible before the target leaves its boot stub.
    arch::memory_barrier();
    arch::smp::kick(core_id);

    Ok(())
}

/// Puts the calling core to sleep until another core wakes it.
pub fn core_sleep() {
    let me = arch::core_id();
    CORES[me].inner.lock_irq_disabled().state = CoreState::Sleeping;
    arch::memory_barrier();

    loop {
        {
            let info = CORES[me].inner.lock_irq_disabled();
            if info.state == CoreState::Running {
                break;
            }
        }
        arch::smp::wait();
    }
}

/// Wakes core `core_id` from [`core_sleep`].
pub fn core_wakeup(core_id: usize) -> Result<()> {
    let slot = CORES.get(core_id).ok_or(Error::InvalidArgs)?;

    {
        let mut info = slot.inner.lock_irq_disabled();
        if info.state != CoreState::Sleeping {
            return Err(Error::InvalidArgs);
        }
        info.state = CoreState::Running;
    }

    arch::memory_barrier();
    arch::smp::notify(core_id);

    Ok(())
}

/// Entry point of an application core, reached from the boot stub.
///
/// Picks up the published start routine, runs it, and resets the core when
/// it returns.
pub fn ap_entry() -> ! {
    let me = arch::core_id();

    let entry = {
        let mut info = CORES[me].inner.lock_irq_disabled();
        debug_assert_eq!(info.state, CoreState::Starting);
        info.state = CoreState::Running;
        info.start.take()
    };

    if let Some(entry) = entry {
        entry();
    }

    core_reset()
}

/// Puts the calling core back into its reset state. Does not return.
pub fn core_reset() -> ! {
    let me = arch::core_id();
    {
        let mut info = CORES[me].inner.lock_irq_disabled();
        info.state = CoreState::Idle;
        info.start = None;
    }
    arch::memory_barrier();
    arch::smp::reset()
}

#[cfg(test)]
mod test {
    use super::*;

    fn park(core_id: usize) {
        let mut info = CORES[core_id].inner.lock_irq_disabled();
        info.state = CoreState::Idle;
        info.start = None;
    }

    fn entry() {}

    #[test]
    fn start_rejects_bad_core() {
        assert_eq!(core_start(CORES_NUM, entry), Err(Error::InvalidArgs));
        assert!(core_state(CORES_NUM).is_err());
    }

    #[test]
    fn start_requires_idle_core() {
        let _env = crate::test_util::env_lock();
        park(2);

        assert_eq!(core_start(2, entry), Ok(()));
        assert_eq!(core_state(2), Ok(CoreState::Starting));
        // A second start while the slot is armed must fail.
        assert_eq!(core_start(2, entry), Err(Error::Busy));
        park(2);
    }

    #[test]
    fn wakeup_requires_sleeping_core() {
        let _env = crate::test_util::env_lock();
        park(3);

        assert_eq!(core_wakeup(3), Err(Error::InvalidArgs));
        CORES[3].inner.lock_irq_disabled().state = CoreState::Sleeping;
        assert_eq!(core_wakeup(3), Ok(()));
        assert_eq!(core_state(3), Ok(CoreState::Running));
        park(3);
    }
}
