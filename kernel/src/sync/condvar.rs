// SPDX-License-Identifier: MPL-2.0

use super::WaitQueue;

/// A condition variable.
///
/// A thin naming layer over [`WaitQueue`]: waiters re-test their condition
/// each time the variable is signaled, so spurious wakeups are harmless by
/// construction.
pub struct Condvar {
    queue: WaitQueue,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            queue: WaitQueue::new(),
        }
    }

    /// Blocks until `cond` returns `Some(_)`, re-testing on every
    /// broadcast.
    pub fn wait_until<F, R>(&self, cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        self.queue.wait_until(cond)
    }

    /// Wakes one waiter.
    pub fn signal(&self) {
        self.queue.wake_one();
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        self.queue.wake_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
