// SPDX-License-Identifier: MPL-2.0

use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use crate::{prelude::*, thread};

/// A wait queue.
///
/// One may wait on a wait queue to put the executing thread to sleep until
/// another thread wakes it through one of the `wake`-family methods.
pub struct WaitQueue {
    // A copy of `wakers.len()`, for the lock-free fast path of the wakers.
    num_wakers: AtomicU32,
    wakers: SpinLock<VecDeque<Arc<Waker>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        WaitQueue {
            num_wakers: AtomicU32::new(0),
            wakers: SpinLock::new(VecDeque::new()),
        }
    }

    /// Waits until `cond` returns `Some(_)`.
    ///
    /// The waker is enqueued before the condition is tested, so a waker
    /// that first makes the condition true and then calls a `wake` method
    /// can never be missed.
    pub fn wait_until<F, R>(&self, mut cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        if let Some(res) = cond() {
            return res;
        }

        let waiter = Waiter::new();
        let waker = waiter.waker();

        loop {
            self.enqueue(waker.clone());

            if let Some(res) = cond() {
                drop(waiter);
                return res;
            }

            waiter.wait();
        }
    }

    /// Wakes up one waiting thread.
    pub fn wake_one(&self) {
        if self.is_empty() {
            return;
        }

        loop {
            let waker = {
                let mut wakers = self.wakers.lock_irq_disabled();
                let Some(waker) = wakers.pop_front() else {
                    break;
                };
                self.num_wakers.fetch_sub(1, Ordering::Release);
                waker
            };

            if waker.wake_up() {
                return;
            }
        }
    }

    /// Wakes up every waiting thread.
    pub fn wake_all(&self) {
        if self.is_empty() {
            return;
        }

        loop {
            let waker = {
                let mut wakers = self.wakers.lock_irq_disabled();
                let Some(waker) = wakers.pop_front() else {
                    break;
                };
                self.num_wakers.fetch_sub(1, Ordering::Release);
                waker
            };

            waker.wake_up();
        }
    }

    fn is_empty(&self) -> bool {
        self.num_wakers.load(Ordering::Acquire) == 0
    }

    fn enqueue(&self, waker: Arc<Waker>) {
        let mut wakers = self.wakers.lock_irq_disabled();
        wakers.push_back(waker);
        self.num_wakers.fetch_add(1, Ordering::Release);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The waiting side of a waker pair; owned by the waiting thread.
struct Waiter {
    waker: Arc<Waker>,
    phantom: PhantomData<*mut ()>,
}

/// The waking side; shared with whoever will deliver the event.
struct Waker {
    has_woken: AtomicBool,
    /// The kernel thread to unpark, when the waiter runs on one. Alien
    /// (hosted) threads spin instead.
    tid: Option<thread::Tid>,
}

impl Waiter {
    fn new() -> Self {
        Self {
            waker: Arc::new(Waker {
                has_woken: AtomicBool::new(false),
                tid: thread::current_waiter_tid(),
            }),
            phantom: PhantomData,
        }
    }

    fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Blocks until woken; returns immediately if the wake already landed.
    fn wait(&self) {
        while !self.waker.has_woken.load(Ordering::Acquire) {
            match self.waker.tid {
                Some(_) => thread::park_current(&self.waker.has_woken),
                None => core::hint::spin_loop(),
            }
        }
        self.waker.has_woken.store(false, Ordering::Release);
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // A wake delivered after this point must be a no-op.
        self.waker.has_woken.store(true, Ordering::Release);
    }
}

impl Waker {
    /// Wakes the waiter. Returns false when the waiter was already woken
    /// or dropped, so queue-draining callers can move on to the next one.
    fn wake_up(&self) -> bool {
        if self.has_woken.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(tid) = self.tid {
            thread::wakeup(tid);
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn wait_returns_immediately_when_ready() {
        let queue = WaitQueue::new();
        assert_eq!(queue.wait_until(|| Some(42)), 42);
    }

    #[test]
    fn wake_one_crosses_threads() {
        let queue = Arc::new(WaitQueue::new());
        let value = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let queue = queue.clone();
            let value = value.clone();
            std::thread::spawn(move || {
                queue.wait_until(|| {
                    let v = value.load(Ordering::Acquire);
                    (v != 0).then_some(v)
                })
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(10));
        value.store(7, Ordering::Release);
        queue.wake_one();

        assert_eq!(consumer.join().unwrap(), 7);
    }

    #[test]
    fn wake_all_releases_every_waiter() {
        let queue = Arc::new(WaitQueue::new());
        let open = Arc::new(AtomicBool::new(false));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let open = open.clone();
                std::thread::spawn(move || {
                    queue.wait_until(|| open.load(Ordering::Acquire).then_some(()))
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(10));
        open.store(true, Ordering::Release);
        queue.wake_all();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}
