// SPDX-License-Identifier: MPL-2.0

use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::trap::irq::{disable_local, DisabledLocalIrqGuard};

/// A spin lock.
pub struct SpinLock<T> {
    val: UnsafeCell<T>,
    lock: AtomicBool,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            val: UnsafeCell::new(val),
            lock: AtomicBool::new(false),
        }
    }

    /// Acquires the spin lock with local IRQs disabled.
    ///
    /// This is the locking flavor that every handler-shared structure must
    /// use: a timer or device handler that takes the same lock would
    /// otherwise deadlock against its own core.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<'_, T> {
        let guard = disable_local();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            irq_guard: Some(guard),
            phantom: PhantomData,
        }
    }

    /// Acquires the spin lock without touching the local IRQ state.
    ///
    /// Only correct for data that is never reached from interrupt context.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            irq_guard: None,
            phantom: PhantomData,
        }
    }

    /// Tries to acquire the spin lock immediately with local IRQs disabled.
    pub fn try_lock_irq_disabled(&self) -> Option<SpinLockGuard<'_, T>> {
        let guard = disable_local();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                irq_guard: Some(guard),
                phantom: PhantomData,
            });
        }
        None
    }

    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.val, f)
    }
}

// SAFETY: only a single lock holder is permitted to access the inner data.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

/// The guard of a spin lock.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    irq_guard: Option<DisabledLocalIrqGuard>,
    phantom: PhantomData<*mut ()>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.val.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl<'a, T: fmt::Debug> fmt::Debug for SpinLockGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// SAFETY: the guard may be inspected from other threads of the same core;
// the `PhantomData<*mut ()>` field already forbids sending it.
unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exclusive_access() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock_irq_disabled();
            *guard += 7;
        }
        assert_eq!(*lock.lock(), 7);
    }

    #[test]
    fn try_lock_contended() {
        let lock = SpinLock::new(());
        let held = lock.lock_irq_disabled();
        assert!(lock.try_lock_irq_disabled().is_none());
        drop(held);
        assert!(lock.try_lock_irq_disabled().is_some());
    }
}
