// SPDX-License-Identifier: MPL-2.0

//! Console output routed to the serial port.

use core::fmt::{self, Write};

use crate::sync::SpinLock;

struct Stdout;

static STDOUT: SpinLock<Stdout> = SpinLock::new(Stdout);

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Writes raw bytes to the console, returning how many were accepted.
///
/// Bytes go out through the polled UART transmitter; on hosted builds the
/// sink is absent and the bytes are discarded.
pub fn write_bytes(bytes: &[u8]) -> usize {
    #[cfg(target_os = "none")]
    crate::arch::serial::write(bytes);
    bytes.len()
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    STDOUT.lock().write_fmt(args).unwrap();
}

/// Prints to the console, without a trailing newline.
#[macro_export]
macro_rules! early_print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::_print(format_args!($fmt $(, $($arg)+)?))
    }
}

/// Prints to the console, with a trailing newline.
#[macro_export]
macro_rules! early_println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}

/// Initializes the console device.
pub(crate) fn init() {
    #[cfg(target_os = "none")]
    crate::arch::serial::init();
}
