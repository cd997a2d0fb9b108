// SPDX-License-Identifier: MPL-2.0

//! Architectural ports.
//!
//! The core never names an architecture; it names capabilities. Everything
//! re-exported here is part of the port contract: the register context, the
//! interrupt-controller surface, TLB maintenance, per-core bootstrap and the
//! console device.

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        mod x86;
        pub use self::x86::*;
    } else {
        compile_error!("unsupported target architecture");
    }
}
