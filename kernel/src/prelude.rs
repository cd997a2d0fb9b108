// SPDX-License-Identifier: MPL-2.0

//! The prelude.

#![allow(unused)]

pub(crate) use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use vesper_hal::{
    mm::{Paddr, Vaddr},
    sync::{SpinLock, SpinLockGuard},
};

pub(crate) use crate::error::{Errno, Error};
pub(crate) use crate::{return_errno, return_errno_with_message};

pub type Result<T> = core::result::Result<T, Error>;
