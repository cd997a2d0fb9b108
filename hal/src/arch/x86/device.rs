// SPDX-License-Identifier: MPL-2.0

//! Port-mapped I/O.

use core::marker::PhantomData;

/// A port-mapped device register.
///
/// Accesses compile to `in`/`out` instructions on bare metal; hosted builds
/// discard writes and read all-ones, so device drivers stay linkable under
/// `cargo test`.
pub struct IoPort<T> {
    port: u16,
    value_marker: PhantomData<T>,
}

impl<T> IoPort<T> {
    /// Creates an I/O port.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the port number refers to the intended
    /// device register and that accesses have no unintended side effects.
    pub const unsafe fn new(port: u16) -> Self {
        Self {
            port,
            value_marker: PhantomData,
        }
    }
}

impl IoPort<u8> {
    pub fn read(&self) -> u8 {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "none")] {
                // SAFETY: the creator of this port vouched for the access.
                unsafe { x86::io::inb(self.port) }
            } else {
                0xff
            }
        }
    }

    pub fn write(&self, value: u8) {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "none")] {
                // SAFETY: the creator of this port vouched for the access.
                unsafe { x86::io::outb(self.port, value) }
            } else {
                let _ = value;
            }
        }
    }
}
