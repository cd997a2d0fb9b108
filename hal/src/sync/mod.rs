// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives of the HAL.

mod spin;

pub use self::spin::{SpinLock, SpinLockGuard};
pub use ::spin::Once;
