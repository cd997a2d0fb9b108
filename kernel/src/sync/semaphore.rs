// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

use super::WaitQueue;

/// A counting semaphore.
pub struct Semaphore {
    count: SpinLock<usize>,
    queue: WaitQueue,
}

impl Semaphore {
    /// Creates a semaphore holding `count` permits.
    pub fn new(count: usize) -> Self {
        Self {
            count: SpinLock::new(count),
            queue: WaitQueue::new(),
        }
    }

    /// Takes one permit, blocking until one is available.
    pub fn down(&self) {
        self.queue.wait_until(|| {
            let mut count = self.count.lock_irq_disabled();
            if *count > 0 {
                *count -= 1;
                Some(())
            } else {
                None
            }
        })
    }

    /// Releases one permit and wakes a blocked taker, if any.
    pub fn up(&self) {
        {
            let mut count = self.count.lock_irq_disabled();
            *count += 1;
        }
        self.queue.wake_one();
    }

    /// Takes one permit without blocking; reports whether one was taken.
    pub fn try_down(&self) -> bool {
        let mut count = self.count.lock_irq_disabled();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn permits_are_counted() {
        let sem = Semaphore::new(2);
        assert!(sem.try_down());
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn down_blocks_until_up() {
        let sem = Arc::new(Semaphore::new(0));

        let taker = {
            let sem = sem.clone();
            std::thread::spawn(move || {
                sem.down();
                sem.down();
            })
        };

        sem.up();
        std::thread::sleep(std::time::Duration::from_millis(5));
        sem.up();

        taker.join().unwrap();
    }
}
