// SPDX-License-Identifier: MPL-2.0

//! The hardware interrupt dispatcher.
//!
//! Lines carry at most one handler; the timer line is special-cased so the
//! tick counter always advances before the registered timer handler runs.
//! The default handler is a no-op that accounts spurious arrivals.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::{error, info, warn};

use crate::{
    arch,
    config::{INTERRUPTS_NUM, INTERRUPT_SPURIOUS_THRESHOLD, INTERRUPT_TIMER},
    sync::SpinLock,
    Error, Result,
};

/// A handler for a hardware interrupt line.
pub type InterruptHandler = fn();

static HANDLERS: SpinLock<[Option<InterruptHandler>; INTERRUPTS_NUM]> =
    SpinLock::new([None; INTERRUPTS_NUM]);

static TIMER_HANDLER: SpinLock<Option<InterruptHandler>> = SpinLock::new(None);

static SPURIOUS: AtomicU32 = AtomicU32::new(0);

static TIMER_TICKS: AtomicU64 = AtomicU64::new(0);

fn default_handler() {
    let count = SPURIOUS.fetch_add(1, Ordering::Relaxed) + 1;
    if count >= INTERRUPT_SPURIOUS_THRESHOLD {
        warn!("spurious interrupt");
    }
}

fn do_timer() {
    TIMER_TICKS.fetch_add(1, Ordering::Relaxed);

    let handler = *TIMER_HANDLER.lock_irq_disabled();
    if let Some(handler) = handler {
        handler();
    }
}

/// Returns the value of the 64-bit timer tick counter.
pub fn timer_ticks() -> u64 {
    TIMER_TICKS.load(Ordering::Relaxed)
}

/// Registers `handler` for interrupt line `num`.
///
/// Fails with [`Error::Busy`] if a handler is already installed. The timer
/// line has its own slot: the dispatcher keeps ticking even while no timer
/// handler is registered.
pub fn register(num: usize, handler: InterruptHandler) -> Result<()> {
    if num >= INTERRUPTS_NUM {
        error!("invalid interrupt number {}", num);
        return Err(Error::InvalidArgs);
    }

    if num != INTERRUPT_TIMER {
        let mut handlers = HANDLERS.lock_irq_disabled();
        if handlers[num].is_some() {
            error!("interrupt handler already registered for irq {}", num);
            return Err(Error::Busy);
        }
        handlers[num] = Some(handler);
    } else {
        let mut timer = TIMER_HANDLER.lock_irq_disabled();
        if timer.is_some() {
            error!("timer interrupt handler already registered");
            return Err(Error::Busy);
        }
        *timer = Some(handler);
    }

    arch::interrupts_unmask(num as u8)?;

    info!("interrupt handler registered for irq {}", num);

    Ok(())
}

/// Unregisters the handler of interrupt line `num`.
pub fn unregister(num: usize) -> Result<()> {
    if num >= INTERRUPTS_NUM {
        error!("invalid interrupt number {}", num);
        return Err(Error::InvalidArgs);
    }

    if num != INTERRUPT_TIMER {
        let mut handlers = HANDLERS.lock_irq_disabled();
        if handlers[num].is_none() {
            error!("no interrupt handler registered for irq {}", num);
            return Err(Error::NotFound);
        }
        handlers[num] = None;
    } else {
        let mut timer = TIMER_HANDLER.lock_irq_disabled();
        if timer.is_none() {
            error!("no timer interrupt handler registered");
            return Err(Error::NotFound);
        }
        *timer = None;
    }

    arch::interrupts_mask(num as u8)?;

    info!("interrupt handler unregistered for irq {}", num);

    Ok(())
}

/// Hardware interrupt dispatcher.
///
/// Acknowledges and dispatches `num`, then drains any interrupt the
/// controller still reports pending before returning to the interrupted
/// context.
pub fn do_interrupt(mut num: usize) {
    loop {
        arch::interrupts_ack(num as u8);

        if num == INTERRUPT_TIMER {
            do_timer();
        } else {
            let handler = {
                let handlers = HANDLERS.lock_irq_disabled();
                handlers.get(num).copied().flatten()
            };
            match handler {
                Some(handler) => handler(),
                None => default_handler(),
            }
        }

        match arch::interrupts_next() {
            Some(pending) => num = pending as usize,
            None => break,
        }
    }
}

pub(crate) fn init() {
    // Raise the interrupt level so that timer interrupts can get through.
    let _ = arch::interrupts_lvl_set(arch::IrqLevel::Level4);
}

#[cfg(test)]
mod test {
    use super::*;

    fn nop() {}

    fn reset(num: usize) {
        if num == INTERRUPT_TIMER {
            *TIMER_HANDLER.lock_irq_disabled() = None;
        } else {
            HANDLERS.lock_irq_disabled()[num] = None;
        }
    }

    #[test]
    fn register_rejects_bad_line() {
        assert_eq!(register(INTERRUPTS_NUM, nop), Err(Error::InvalidArgs));
        assert_eq!(unregister(INTERRUPTS_NUM), Err(Error::InvalidArgs));
    }

    #[test]
    fn line_is_exclusive() {
        const IRQ: usize = 4;
        reset(IRQ);

        assert_eq!(register(IRQ, nop), Ok(()));
        assert_eq!(register(IRQ, nop), Err(Error::Busy));
        assert_eq!(unregister(IRQ), Ok(()));
        assert_eq!(unregister(IRQ), Err(Error::NotFound));
    }

    #[test]
    fn timer_slot_is_separate() {
        let _env = crate::test_util::env_lock();
        reset(INTERRUPT_TIMER);

        assert_eq!(register(INTERRUPT_TIMER, nop), Ok(()));
        assert_eq!(register(INTERRUPT_TIMER, nop), Err(Error::Busy));
        assert_eq!(unregister(INTERRUPT_TIMER), Ok(()));
    }

    #[test]
    fn timer_ticks_advance() {
        let _env = crate::test_util::env_lock();
        reset(INTERRUPT_TIMER);

        let before = timer_ticks();
        do_interrupt(INTERRUPT_TIMER);
        do_interrupt(INTERRUPT_TIMER);
        assert!(timer_ticks() >= before + 2);
    }
}
