// SPDX-License-Identifier: MPL-2.0

//! Compile-time configuration of the kernel layers.

#![allow(unused)]

/// Maximum number of processes, the kernel process included.
pub const PROCESS_MAX: usize = 16;

/// Maximum number of kernel threads.
pub const THREAD_MAX: usize = 16;

/// Timer ticks a thread runs before the scheduler considers preemption.
pub const PROCESS_QUANTUM: u32 = 100;
