// SPDX-License-Identifier: MPL-2.0

//! The exception broker.
//!
//! A process may claim an exception line and receive the faults raised on
//! it as ordinary events in user mode: the in-kernel handler publishes the
//! fault and blocks the faulting thread until the owner acknowledges it
//! with a resume. One owner per line, one pending event per line.

use vesper_hal::{
    arch::Context,
    config::EXCEPTIONS_NUM,
    trap::exception::{self, Exception},
};

use lazy_static::lazy_static;

use crate::{prelude::*, sync::Condvar, thread::Pid};

/// What a process asks the broker to do with an exception line.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExcpAction {
    /// Claim the line: faults are delivered to the caller.
    Handle,
    /// Relinquish the line back to the kernel default.
    Defer,
}

/// The event handed to the owner of a line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExcpInfo {
    /// Number of the exception line.
    pub num: u32,
    /// Faulting address.
    pub addr: Vaddr,
    /// Program counter of the faulting instruction.
    pub pc: Vaddr,
}

#[derive(Clone, Copy)]
struct Line {
    owner: Option<Pid>,
    pending: bool,
    info: ExcpInfo,
}

impl Line {
    const fn idle() -> Self {
        Line {
            owner: None,
            pending: false,
            info: ExcpInfo {
                num: 0,
                addr: 0,
                pc: 0,
            },
        }
    }
}

static LINES: SpinLock<[Line; EXCEPTIONS_NUM]> = SpinLock::new([Line::idle(); EXCEPTIONS_NUM]);

lazy_static! {
    /// Signaled whenever some line publishes a fault.
    static ref TRIGGERED: Condvar = Condvar::new();
    /// Per-line acknowledge signals.
    static ref ACKS: [Condvar; EXCEPTIONS_NUM] = [(); EXCEPTIONS_NUM].map(|_| Condvar::new());
}

fn line_is_valid(excpnum: usize) -> bool {
    excpnum < EXCEPTIONS_NUM
}

fn owns(pid: Pid, excpnum: usize) -> bool {
    LINES.lock_irq_disabled()[excpnum].owner == Some(pid)
}

fn owns_any(pid: Pid) -> bool {
    LINES
        .lock_irq_disabled()
        .iter()
        .any(|line| line.owner == Some(pid))
}

/// Claims or relinquishes the exception line `excpnum` for `pid`.
///
/// A claim fails with `EBUSY` while another process owns the line; a
/// release is owner-only and fails with `EBUSY` while an event is still
/// pending on the line.
pub fn control(pid: Pid, excpnum: usize, action: ExcpAction) -> Result<()> {
    trace!("excpnum={}, action={:?}", excpnum, action);

    if !line_is_valid(excpnum) {
        error!("invalid exception number {}", excpnum);
        return_errno!(Errno::EINVAL);
    }

    let mut lines = LINES.lock_irq_disabled();
    let line = &mut lines[excpnum];

    match action {
        ExcpAction::Handle => {
            if line.owner.is_some() {
                error!("exception {} is assigned to another process", excpnum);
                return_errno!(Errno::EBUSY);
            }
            line.owner = Some(pid);
        }
        ExcpAction::Defer => {
            if line.owner != Some(pid) {
                error!("exception {} is not assigned to the calling process", excpnum);
                return_errno!(Errno::EPERM);
            }
            if line.pending {
                error!("exception {} still has a pending event", excpnum);
                return_errno!(Errno::EBUSY);
            }
            line.owner = None;
        }
    }

    Ok(())
}

/// Blocks until a line owned by `pid` publishes a fault and returns it.
///
/// The line stays pending until the owner calls [`resume`].
pub fn wait(pid: Pid) -> Result<ExcpInfo> {
    if !owns_any(pid) {
        error!("process {} is not assigned to handle any exception", pid);
        return_errno!(Errno::EPERM);
    }

    // A fault published after the ownership check but before this thread
    // reaches the condvar is caught by the queue-then-test discipline of
    // the wait; the broker-level race with a fault raised before the
    // claim itself is a documented limitation.
    let info = TRIGGERED.wait_until(|| {
        let lines = LINES.lock_irq_disabled();
        lines
            .iter()
            .find(|line| line.owner == Some(pid) && line.pending)
            .map(|line| line.info)
    });

    Ok(info)
}

/// Acknowledges the pending fault on `excpnum`, letting the faulting
/// thread retry. Owner-only.
pub fn resume(pid: Pid, excpnum: usize) -> Result<()> {
    if !line_is_valid(excpnum) {
        error!("invalid exception number {}", excpnum);
        return_errno!(Errno::EINVAL);
    }

    {
        let mut lines = LINES.lock_irq_disabled();
        let line = &mut lines[excpnum];

        if line.owner != Some(pid) {
            error!("exception {} is not assigned to the calling process", excpnum);
            return_errno!(Errno::EPERM);
        }
        if !line.pending {
            error!("exception {} has no pending event", excpnum);
            return_errno!(Errno::EINVAL);
        }

        line.pending = false;
    }

    ACKS[excpnum].broadcast();

    Ok(())
}

/// The in-kernel handler installed on every exception line.
///
/// Publishes the fault on the line and parks the faulting thread until the
/// owner resumes it. An unassigned or reentrant fault is fatal.
fn kernel_exception_handler(excp: &Exception, ctx: &Context) {
    let excpnum = excp.num;

    {
        let mut lines = LINES.lock_irq_disabled();
        let line = &mut lines[excpnum];

        if line.owner.is_none() {
            ctx.dump();
            excp.dump();
            panic!("unassigned exception {}", excpnum);
        }

        if line.pending {
            ctx.dump();
            excp.dump();
            // TODO: support reentrant exceptions.
            panic!("reentrant exceptions are not supported");
        }

        line.pending = true;
        line.info = ExcpInfo {
            num: excpnum as u32,
            addr: excp.addr,
            pc: excp.pc,
        };
    }

    TRIGGERED.broadcast();

    warn!("exception {} was triggered", excpnum);

    // Parked until the owner acknowledges; the publish above may race a
    // slow owner that has not reached its wait yet, which the single
    // producer/consumer shape of a line tolerates.
    ACKS[excpnum].wait_until(|| {
        let lines = LINES.lock_irq_disabled();
        (!lines[excpnum].pending).then_some(())
    });
}

/// Initializes the exception broker and hooks every line.
pub fn init() {
    info!("initializing exception manager...");

    for excpnum in 0..EXCEPTIONS_NUM {
        if exception::register(excpnum, kernel_exception_handler).is_err() {
            warn!("failed to hook exception line {}", excpnum);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vesper_hal::trap::exception::EXCEPTION_PAGE_FAULT;

    fn reset() {
        let mut lines = LINES.lock_irq_disabled();
        for line in lines.iter_mut() {
            *line = Line::idle();
        }
    }

    const OWNER: Pid = 3;
    const INTRUDER: Pid = 4;

    #[test]
    fn ownership_is_exclusive() {
        let _env = crate::test_util::env_lock();
        reset();

        assert_eq!(control(OWNER, EXCEPTION_PAGE_FAULT, ExcpAction::Handle), Ok(()));
        assert_eq!(
            control(INTRUDER, EXCEPTION_PAGE_FAULT, ExcpAction::Handle),
            Err(Error::new(Errno::EBUSY))
        );
        assert_eq!(
            control(INTRUDER, EXCEPTION_PAGE_FAULT, ExcpAction::Defer),
            Err(Error::new(Errno::EPERM))
        );
        assert_eq!(control(OWNER, EXCEPTION_PAGE_FAULT, ExcpAction::Defer), Ok(()));
        assert_eq!(
            control(INTRUDER, EXCEPTION_PAGE_FAULT, ExcpAction::Handle),
            Ok(())
        );
        reset();
    }

    #[test]
    fn control_rejects_bad_line() {
        let _env = crate::test_util::env_lock();
        assert_eq!(
            control(OWNER, EXCEPTIONS_NUM, ExcpAction::Handle),
            Err(Error::new(Errno::EINVAL))
        );
        assert_eq!(resume(OWNER, EXCEPTIONS_NUM), Err(Error::new(Errno::EINVAL)));
    }

    #[test]
    fn wait_requires_ownership() {
        let _env = crate::test_util::env_lock();
        reset();
        assert_eq!(wait(OWNER).map(|_| ()), Err(Error::new(Errno::EPERM)));
    }

    #[test]
    fn resume_requires_pending_event() {
        let _env = crate::test_util::env_lock();
        reset();

        control(OWNER, 6, ExcpAction::Handle).unwrap();
        assert_eq!(resume(OWNER, 6), Err(Error::new(Errno::EINVAL)));
        assert_eq!(resume(INTRUDER, 6), Err(Error::new(Errno::EPERM)));
        control(OWNER, 6, ExcpAction::Defer).unwrap();
    }

    #[test]
    fn handover_protocol_end_to_end() {
        let _env = crate::test_util::env_lock();
        reset();

        control(OWNER, EXCEPTION_PAGE_FAULT, ExcpAction::Handle).unwrap();

        // The faulting side: a thread that hits a page fault at V and
        // enters the kernel handler, which parks it until the resume.
        let fault = std::thread::spawn(|| {
            let excp = Exception {
                num: EXCEPTION_PAGE_FAULT,
                code: 0,
                addr: 0x8000_1000,
                pc: 0x8000_0040,
            };
            kernel_exception_handler(&excp, &Context::default());
        });

        // The owner observes exactly the fault that was raised.
        let info = wait(OWNER).unwrap();
        assert_eq!(info.num, EXCEPTION_PAGE_FAULT as u32);
        assert_eq!(info.addr, 0x8000_1000);
        assert_eq!(info.pc, 0x8000_0040);

        // Deferring while the event is pending is refused.
        assert_eq!(
            control(OWNER, EXCEPTION_PAGE_FAULT, ExcpAction::Defer),
            Err(Error::new(Errno::EBUSY))
        );

        // The owner acknowledges; the faulting thread must come back.
        resume(OWNER, EXCEPTION_PAGE_FAULT).unwrap();
        fault.join().unwrap();

        assert!(!LINES.lock_irq_disabled()[EXCEPTION_PAGE_FAULT].pending);
        control(OWNER, EXCEPTION_PAGE_FAULT, ExcpAction::Defer).unwrap();
        reset();
    }

    #[test]
    #[should_panic(expected = "unassigned exception")]
    fn unassigned_fault_is_fatal() {
        let _env = crate::test_util::env_lock();
        reset();

        let excp = Exception {
            num: 0,
            code: 0,
            addr: 0,
            pc: 0,
        };
        kernel_exception_handler(&excp, &Context::default());
    }
}
