// SPDX-License-Identifier: MPL-2.0

//! Exception and interrupt dispatching.

pub mod exception;
pub mod interrupt;
pub mod irq;

pub use self::{
    exception::{Exception, ExceptionHandler},
    irq::{disable_local, DisabledLocalIrqGuard},
};

pub(crate) fn init() {
    exception::init();
    interrupt::init();
}
