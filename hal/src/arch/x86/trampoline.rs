// SPDX-License-Identifier: MPL-2.0

//! Low-level trap entry points.
//!
//! The assembly stubs package the interrupted register file into a
//! [`Context`] and tail into the high-level dispatchers. Hosted builds keep
//! the dispatch glue but point every gate at an unreachable stub.

use crate::{
    config::{EXCEPTIONS_NUM, INTERRUPTS_NUM},
    sync::Once,
    trap::exception::{self, Exception, EXCEPTION_PAGE_FAULT},
    trap::interrupt,
};

use super::{ctx::Context, mm};

/// The kernel-call entry installed by the kernel crate.
///
/// Arguments are the call number followed by five word-sized arguments; the
/// return value is written back into the trapped `eax`.
pub type KcallEntry = fn(u32, usize, usize, usize, usize, usize) -> isize;

static KCALL_ENTRY: Once<KcallEntry> = Once::new();

/// Installs the kernel-call entry. May be called once.
pub fn set_kcall_entry(entry: KcallEntry) {
    KCALL_ENTRY.call_once(|| entry);
}

/// High-level side of the exception trampolines.
#[no_mangle]
extern "C" fn do_excp(ctx: &Context) {
    let num = ctx.num as usize;
    let excp = Exception {
        num,
        code: ctx.code,
        addr: if num == EXCEPTION_PAGE_FAULT {
            mm::page_fault_addr()
        } else {
            0
        },
        pc: ctx.eip as usize,
    };
    exception::do_exception(&excp, ctx);
}

/// High-level side of the hardware interrupt trampolines.
#[no_mangle]
extern "C" fn do_hwint(ctx: &Context) {
    interrupt::do_interrupt(ctx.num as usize);
}

/// High-level side of the kernel-call gate.
#[no_mangle]
extern "C" fn do_kcall(ctx: &mut Context) {
    let ret = match KCALL_ENTRY.get() {
        Some(entry) => entry(
            ctx.eax,
            ctx.ebx as usize,
            ctx.ecx as usize,
            ctx.edx as usize,
            ctx.esi as usize,
            ctx.edi as usize,
        ),
        None => -1,
    };
    ctx.eax = ret as u32;
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86", target_os = "none"))] {
        core::arch::global_asm!(include_str!("trampoline.S"), options(att_syntax));

        extern "C" {
            fn _do_excp0();
            fn _do_hwint0();
            fn _do_kcall();
        }

        /// Exception stubs are laid out at a fixed stride so the table can
        /// be built arithmetically.
        const STUB_STRIDE: usize = 16;

        pub(super) fn exception_hooks() -> [usize; EXCEPTIONS_NUM] {
            let mut hooks = [0; EXCEPTIONS_NUM];
            let base = _do_excp0 as usize;
            for (n, hook) in hooks.iter_mut().enumerate() {
                *hook = base + n * STUB_STRIDE;
            }
            hooks
        }

        pub(super) fn hwint_hooks() -> [usize; INTERRUPTS_NUM] {
            let mut hooks = [0; INTERRUPTS_NUM];
            let base = _do_hwint0 as usize;
            for (i, hook) in hooks.iter_mut().enumerate() {
                *hook = base + i * STUB_STRIDE;
            }
            hooks
        }

        pub(super) fn kcall_hook() -> usize {
            _do_kcall as usize
        }
    } else {
        extern "C" fn hook_stub() {
            unreachable!("trap trampoline executed on a hosted build");
        }

        pub(super) fn exception_hooks() -> [usize; EXCEPTIONS_NUM] {
            [hook_stub as usize; EXCEPTIONS_NUM]
        }

        pub(super) fn hwint_hooks() -> [usize; INTERRUPTS_NUM] {
            [hook_stub as usize; INTERRUPTS_NUM]
        }

        pub(super) fn kcall_hook() -> usize {
            hook_stub as usize
        }
    }
}

