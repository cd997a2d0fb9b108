// SPDX-License-Identifier: MPL-2.0

//! The exception dispatcher.
//!
//! Each of the [`EXCEPTIONS_NUM`] exception lines carries either the default
//! handler, which dumps the interrupted context and panics, or a custom
//! handler installed with [`register`]. The low-level trampolines funnel
//! every synchronous fault into [`do_exception`].

use log::{error, warn};

use crate::{
    arch::Context,
    config::EXCEPTIONS_NUM,
    sync::SpinLock,
    Error, Result,
};

/// Information about an exception, passed by value to every handler.
#[derive(Clone, Copy, Debug, Default)]
pub struct Exception {
    /// Number of the exception line.
    pub num: usize,
    /// Error code pushed by the hardware, zero when there is none.
    pub code: u32,
    /// Faulting address, meaningful for memory faults only.
    pub addr: usize,
    /// Program counter of the faulting instruction.
    pub pc: usize,
}

impl Exception {
    /// Logs the exception record.
    pub fn dump(&self) {
        error!(
            "exception {} ({}): code={:#x} addr={:#x} pc={:#x}",
            self.num,
            name(self.num),
            self.code,
            self.addr,
            self.pc
        );
    }
}

/// A handler for an exception line.
pub type ExceptionHandler = fn(&Exception, &Context);

#[derive(Clone, Copy)]
enum Line {
    Default,
    Custom(ExceptionHandler),
}

static LINES: SpinLock<[Line; EXCEPTIONS_NUM]> =
    SpinLock::new([Line::Default; EXCEPTIONS_NUM]);

/// Names of the exception lines of the port.
const NAMES: [&str; EXCEPTIONS_NUM] = [
    "divide-by-zero error",
    "debug exception",
    "non-maskable interrupt",
    "breakpoint exception",
    "overflow exception",
    "bounds check exception",
    "invalid opcode exception",
    "coprocessor not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid tss",
    "segment not present",
    "stack segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "floating point exception",
    "alignment check exception",
    "machine check exception",
    "simd unit exception",
    "virtualization exception",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "security exception",
    "reserved",
];

/// The page-fault exception line.
pub const EXCEPTION_PAGE_FAULT: usize = 14;
/// The general-protection exception line.
pub const EXCEPTION_PROTECTION: usize = 13;

/// Returns the name of an exception line.
pub fn name(num: usize) -> &'static str {
    NAMES.get(num).copied().unwrap_or("unknown")
}

fn default_handler(excp: &Exception, ctx: &Context) -> ! {
    ctx.dump();
    excp.dump();
    panic!("unhandled exception {}", excp.num);
}

/// Registers `handler` for exception line `num`.
///
/// Overwriting a previously installed custom handler is allowed but logged.
pub fn register(num: usize, handler: ExceptionHandler) -> Result<()> {
    if num >= EXCEPTIONS_NUM {
        error!("invalid exception number {}", num);
        return Err(Error::InvalidArgs);
    }

    let mut lines = LINES.lock_irq_disabled();
    if let Line::Custom(old) = lines[num] {
        warn!(
            "overwriting handler {:#x} for {}",
            old as usize,
            name(num)
        );
    }
    lines[num] = Line::Custom(handler);

    Ok(())
}

/// Unregisters the handler of exception line `num`, restoring the default.
pub fn unregister(num: usize) -> Result<()> {
    if num >= EXCEPTIONS_NUM {
        error!("invalid exception number {}", num);
        return Err(Error::InvalidArgs);
    }

    let mut lines = LINES.lock_irq_disabled();
    if matches!(lines[num], Line::Default) {
        error!("no handler for exception {}", num);
        return Err(Error::NotFound);
    }
    lines[num] = Line::Default;

    Ok(())
}

/// High-level exception dispatcher.
///
/// The handler pointer is copied out of the line table before the call:
/// handlers are entitled to block, and must not do so while the table lock
/// is held.
pub fn do_exception(excp: &Exception, ctx: &Context) {
    let line = {
        let lines = LINES.lock_irq_disabled();
        lines[excp.num]
    };

    match line {
        Line::Custom(handler) => handler(excp, ctx),
        Line::Default => default_handler(excp, ctx),
    }
}

pub(crate) fn init() {
    // Lines start out on the default handler; nothing to install.
}

#[cfg(test)]
mod test {
    use super::*;

    fn nop_handler(_excp: &Exception, _ctx: &Context) {}
    fn other_handler(_excp: &Exception, _ctx: &Context) {}

    fn reset(num: usize) {
        let mut lines = LINES.lock_irq_disabled();
        lines[num] = Line::Default;
    }

    #[test]
    fn register_rejects_bad_line() {
        assert_eq!(
            register(EXCEPTIONS_NUM, nop_handler),
            Err(Error::InvalidArgs)
        );
        assert_eq!(unregister(EXCEPTIONS_NUM), Err(Error::InvalidArgs));
    }

    #[test]
    fn register_unregister_cycle() {
        const LINE: usize = 3;
        reset(LINE);

        assert_eq!(unregister(LINE), Err(Error::NotFound));
        assert_eq!(register(LINE, nop_handler), Ok(()));
        // Overwriting succeeds, with a warning.
        assert_eq!(register(LINE, other_handler), Ok(()));
        assert_eq!(unregister(LINE), Ok(()));
        assert_eq!(unregister(LINE), Err(Error::NotFound));
    }

    #[test]
    fn dispatch_reaches_custom_handler() {
        use core::sync::atomic::{AtomicUsize, Ordering};

        const LINE: usize = 6;
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        reset(LINE);

        fn probe(excp: &Exception, _ctx: &Context) {
            SEEN.store(excp.pc, Ordering::Relaxed);
        }

        register(LINE, probe).unwrap();
        let excp = Exception {
            num: LINE,
            code: 0,
            addr: 0,
            pc: 0xdead_beef,
        };
        do_exception(&excp, &Context::default());
        assert_eq!(SEEN.load(Ordering::Relaxed), 0xdead_beef);
        unregister(LINE).unwrap();
    }
}
