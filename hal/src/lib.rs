// SPDX-License-Identifier: MPL-2.0

//! The hardware abstraction layer of Vesper.
//!
//! This crate hosts everything below the process layer: the architectural
//! port (vector tables, interrupt controllers, MMU primitives, per-core
//! bootstrap), the exception and interrupt dispatchers, and the physical and
//! virtual memory managers (page frames, the kernel page pool, and virtual
//! memory spaces).
#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;
#[macro_use]
extern crate static_assertions;

pub mod arch;
pub mod config;
pub mod console;
mod error;
pub mod logger;
pub mod mm;
pub mod panicking;
pub mod prelude;
pub mod smp;
pub mod sync;
#[cfg(test)]
mod test_util;
pub mod trap;

pub use self::{error::Error, prelude::Result};

/// Brings up the hardware abstraction layer on the boot core.
///
/// The initialization order follows the layering of the kernel: the
/// architectural port first, then the dispatchers, then the memory managers
/// (the memory map must have been committed by the boot code before frames
/// are carved out of it). Repeated calls are no-ops.
pub fn init() {
    static INIT: sync::Once<()> = sync::Once::new();
    INIT.call_once(|| {
        logger::init();
        arch::init();
        trap::init();
        mm::init();
        smp::init();
    });
}
