// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A bad pointer, an out-of-range number, or a misaligned address.
    InvalidArgs,
    /// The caller may not perform the operation.
    AccessDenied,
    /// The resource is already assigned or initialized.
    Busy,
    /// The handle or entry does not exist.
    NotFound,
    /// The update raced with another writer; retry.
    Again,
    /// A table or pool is exhausted.
    NoMemory,
}
