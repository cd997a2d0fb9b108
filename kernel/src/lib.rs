// SPDX-License-Identifier: MPL-2.0

//! The kernel part of Vesper.
//!
//! Everything above the HAL: identities, kernel threads and their
//! scheduler, processes, the exception-delivery broker that lets a process
//! handle faults in user mode, and the kernel-call dispatcher.
#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod config;
mod error;
pub mod excp;
pub mod iam;
pub mod kcall;
pub mod kmod;
pub mod prelude;
pub mod process;
pub mod sync;
#[cfg(test)]
mod test_util;
pub mod thread;

pub use self::error::{Errno, Error};

use log::info;

/// Brings the kernel up on the boot core.
///
/// Layering order: the HAL first (arch, dispatchers, memory), then the
/// subsystems bottom-up, and finally the kernel-call service thread.
/// Repeated calls are no-ops.
pub fn init() {
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        vesper_hal::init();

        iam::init();
        process::init();
        excp::init();
        kcall::init();

        info!("kernel is up");
    });
}
