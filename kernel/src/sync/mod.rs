// SPDX-License-Identifier: MPL-2.0

//! Blocking synchronization for kernel threads.

mod condvar;
mod semaphore;
mod wait;

pub use self::{condvar::Condvar, semaphore::Semaphore, wait::WaitQueue};
