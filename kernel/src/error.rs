// SPDX-License-Identifier: MPL-2.0

use vesper_hal::Error as HalError;

/// POSIX-style error codes carried back to user space as negative words.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    EAGAIN = 11,
    ENOMEM = 12,
    EBUSY = 16,
    EINVAL = 22,
    ENOSYS = 38,
}

/// The error type of the kernel layers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn errno(&self) -> Errno {
        self.errno
    }

    /// The negative word handed back through the kernel-call boundary.
    pub const fn as_retval(&self) -> isize {
        -(self.errno as i32 as isize)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<HalError> for Error {
    fn from(err: HalError) -> Self {
        match err {
            HalError::InvalidArgs => Error::new(Errno::EINVAL),
            HalError::AccessDenied => Error::new(Errno::EPERM),
            HalError::Busy => Error::new(Errno::EBUSY),
            HalError::NotFound => Error::new(Errno::ENOENT),
            HalError::Again => Error::new(Errno::EAGAIN),
            HalError::NoMemory => Error::new(Errno::ENOMEM),
        }
    }
}

/// Returns from the enclosing function with an error.
#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::Error::new($errno))
    };
}

/// Returns from the enclosing function with an error and a log-visible
/// message.
#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $msg: literal) => {{
        log::error!($msg);
        return Err($crate::Error::with_message($errno, $msg));
    }};
}
