// SPDX-License-Identifier: MPL-2.0

//! The kernel-call dispatcher.
//!
//! User threads enter through the trap gate with a call number and up to
//! five word-sized arguments. Fast-path calls run right in trap context;
//! everything else is handed to the in-kernel service thread through a
//! one-slot scoreboard guarded by two counting semaphores:
//!
//! ```text
//! user:    scoreboard := {nr, args}; up(kernel); down(user); ret
//! kernel:  loop { down(kernel); dispatch; up(user) }
//! ```

use core::cell::UnsafeCell;

use lazy_static::lazy_static;
use vesper_hal::{
    arch,
    config::PAGE_SIZE,
    mm::{frame, vmem, AccessMode, FRAME_NULL},
};

use crate::{
    excp::{self, ExcpAction},
    iam, kmod,
    prelude::*,
    process,
    sync::Semaphore,
    thread,
};

/// Kernel call numbers.
///
/// Numbers up to [`KcallNr::Shutdown`] are fast-path and execute in trap
/// context; the rest ride the scoreboard to the service thread.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KcallNr {
    Void0 = 0,
    Void1 = 1,
    Void2 = 2,
    Void3 = 3,
    Void4 = 4,
    Void5 = 5,
    Write = 6,
    Fralloc = 7,
    Frfree = 8,
    Vmcreate = 9,
    Vmremove = 10,
    Vmmap = 11,
    Vmunmap = 12,
    Vmctrl = 13,
    Vminfo = 14,
    KmodGet = 15,
    Spawn = 16,
    Shutdown = 17,
    Setuid = 18,
    Seteuid = 19,
    Setgid = 20,
    Setegid = 21,
    Getuid = 22,
    Geteuid = 23,
    Getgid = 24,
    Getegid = 25,
    Excpctrl = 26,
    Excpwait = 27,
    Excpresume = 28,
    Pexit = 29,
}

impl KcallNr {
    fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Void0,
            1 => Self::Void1,
            2 => Self::Void2,
            3 => Self::Void3,
            4 => Self::Void4,
            5 => Self::Void5,
            6 => Self::Write,
            7 => Self::Fralloc,
            8 => Self::Frfree,
            9 => Self::Vmcreate,
            10 => Self::Vmremove,
            11 => Self::Vmmap,
            12 => Self::Vmunmap,
            13 => Self::Vmctrl,
            14 => Self::Vminfo,
            15 => Self::KmodGet,
            16 => Self::Spawn,
            17 => Self::Shutdown,
            18 => Self::Setuid,
            19 => Self::Seteuid,
            20 => Self::Setgid,
            21 => Self::Setegid,
            22 => Self::Getuid,
            23 => Self::Geteuid,
            24 => Self::Getgid,
            25 => Self::Getegid,
            26 => Self::Excpctrl,
            27 => Self::Excpwait,
            28 => Self::Excpresume,
            29 => Self::Pexit,
            _ => return None,
        })
    }

    fn is_fast(&self) -> bool {
        (*self as u32) <= (Self::Shutdown as u32)
    }
}

/// Chmod request of the `vmctrl` call.
const VMCTRL_CHMOD: usize = 1;

/// The page-information record `vminfo` fills in.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageInfoOut {
    pub frame: u32,
    pub mode: u32,
}

/// The module record `kmod_get` fills in.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KmodOut {
    pub base: usize,
    pub size: usize,
}

struct ScoreboardData {
    pid: thread::Pid,
    nr: u32,
    args: [usize; 5],
    ret: isize,
}

/// The one-slot rendezvous between the trap producer and the service
/// consumer.
struct Scoreboard(UnsafeCell<ScoreboardData>);

// SAFETY: accesses alternate between exactly one producer and the service
// thread, ordered by the two semaphores below.
unsafe impl Sync for Scoreboard {}

static SCOREBOARD: Scoreboard = Scoreboard(UnsafeCell::new(ScoreboardData {
    pid: 0,
    nr: 0,
    args: [0; 5],
    ret: 0,
}));

lazy_static! {
    static ref KERNEL_SEM: Semaphore = Semaphore::new(0);
    static ref USER_SEM: Semaphore = Semaphore::new(0);
}

fn ok_or_retval(result: Result<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(err) => err.as_retval(),
    }
}

fn kcall_write(fd: usize, buf: usize, len: usize) -> Result<isize> {
    if fd != 1 && fd != 2 {
        return_errno!(Errno::EINVAL);
    }
    if buf == 0 {
        return_errno!(Errno::EINVAL);
    }
    #[cfg(target_os = "none")]
    {
        // SAFETY: the trap entry vouched that the buffer is readable from
        // the caller's address space, which is active here.
        let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, len) };
        vesper_hal::console::write_bytes(bytes);
    }
    Ok(len as isize)
}

fn kcall_fralloc() -> isize {
    let frame = frame::frame_alloc();
    if frame == FRAME_NULL {
        return -1;
    }
    frame as isize
}

fn kcall_frfree(frame: usize) -> Result<isize> {
    frame::frame_free(frame as u32)?;
    Ok(0)
}

fn kcall_vmcreate() -> Result<isize> {
    let space = vmem::create()?;
    Ok(space.index() as isize)
}

fn kcall_vmremove(space: usize) -> Result<isize> {
    vmem::destroy(vmem::Vmem::from_raw(space as u32))?;
    Ok(0)
}

fn kcall_vmmap(space: usize, vaddr: usize, frame: usize) -> Result<isize> {
    vmem::map(
        vmem::Vmem::from_raw(space as u32),
        vaddr,
        frame as u32,
        PAGE_SIZE,
        true,
        false,
    )?;
    Ok(0)
}

fn kcall_vmunmap(space: usize, vaddr: usize) -> Result<isize> {
    let frame = vmem::unmap(vmem::Vmem::from_raw(space as u32), vaddr)?;
    Ok(frame as isize)
}

fn kcall_vmctrl(space: usize, request: usize, vaddr: usize, mode: usize) -> Result<isize> {
    if request != VMCTRL_CHMOD {
        return_errno!(Errno::EINVAL);
    }
    let mode = AccessMode::from_bits(mode as u32).ok_or(Error::new(Errno::EINVAL))?;
    vmem::ctrl(vmem::Vmem::from_raw(space as u32), vaddr, mode)?;
    Ok(0)
}

fn kcall_vminfo(space: usize, vaddr: usize, buf: usize) -> Result<isize> {
    if buf == 0 {
        return_errno!(Errno::EINVAL);
    }
    let info = vmem::info(vmem::Vmem::from_raw(space as u32), vaddr)?;
    let out = PageInfoOut {
        frame: info.frame,
        mode: info.mode.bits(),
    };
    // SAFETY: the caller handed a writable record of the right shape.
    unsafe { (buf as *mut PageInfoOut).write(out) };
    Ok(0)
}

fn kcall_kmod_get(buf: usize, index: usize) -> Result<isize> {
    if buf == 0 {
        return_errno!(Errno::EINVAL);
    }
    let module = kmod::get(index)?;
    let out = KmodOut {
        base: module.base,
        size: module.size,
    };
    // SAFETY: the caller handed a writable record of the right shape.
    unsafe { (buf as *mut KmodOut).write(out) };
    Ok(0)
}

fn kcall_spawn(addr: usize) -> Result<isize> {
    let module = kmod::find_by_addr(addr)?;
    let pid = process::create(module.base, module.size)?;
    Ok(pid as isize)
}

fn do_fast(nr: KcallNr, args: [usize; 5]) -> isize {
    match nr {
        KcallNr::Void0 => 0,
        KcallNr::Void1 => args[0] as isize,
        KcallNr::Void2 => (args[0] + args[1]) as isize,
        KcallNr::Void3 => (args[0] + args[1] + args[2]) as isize,
        KcallNr::Void4 => (args[0] + args[1] + args[2] + args[3]) as isize,
        KcallNr::Void5 => (args[0] + args[1] + args[2] + args[3] + args[4]) as isize,
        KcallNr::Write => ok_or_retval(kcall_write(args[0], args[1], args[2])),
        KcallNr::Fralloc => kcall_fralloc(),
        KcallNr::Frfree => ok_or_retval(kcall_frfree(args[0])),
        KcallNr::Vmcreate => ok_or_retval(kcall_vmcreate()),
        KcallNr::Vmremove => ok_or_retval(kcall_vmremove(args[0])),
        KcallNr::Vmmap => ok_or_retval(kcall_vmmap(args[0], args[1], args[2])),
        KcallNr::Vmunmap => ok_or_retval(kcall_vmunmap(args[0], args[1])),
        KcallNr::Vmctrl => ok_or_retval(kcall_vmctrl(args[0], args[1], args[2], args[3])),
        KcallNr::Vminfo => ok_or_retval(kcall_vminfo(args[0], args[1], args[2])),
        KcallNr::KmodGet => ok_or_retval(kcall_kmod_get(args[0], args[1])),
        KcallNr::Spawn => ok_or_retval(kcall_spawn(args[0])),
        KcallNr::Shutdown => arch::shutdown(),
        _ => unreachable!("slow call on the fast path"),
    }
}

fn dispatch_slow(pid: thread::Pid, nr: u32, args: [usize; 5]) -> isize {
    let Some(nr) = KcallNr::from_raw(nr) else {
        return -(Errno::ENOSYS as i32 as isize);
    };

    let result = (|| -> Result<isize> {
        match nr {
            KcallNr::Setuid => {
                iam::setuid(process::identity_of(pid)?, args[0] as u32)?;
                Ok(0)
            }
            KcallNr::Seteuid => {
                iam::seteuid(process::identity_of(pid)?, args[0] as u32)?;
                Ok(0)
            }
            KcallNr::Setgid => {
                iam::setgid(process::identity_of(pid)?, args[0] as u32)?;
                Ok(0)
            }
            KcallNr::Setegid => {
                iam::setegid(process::identity_of(pid)?, args[0] as u32)?;
                Ok(0)
            }
            KcallNr::Getuid => Ok(iam::getuid(process::identity_of(pid)?)? as isize),
            KcallNr::Geteuid => Ok(iam::geteuid(process::identity_of(pid)?)? as isize),
            KcallNr::Getgid => Ok(iam::getgid(process::identity_of(pid)?)? as isize),
            KcallNr::Getegid => Ok(iam::getegid(process::identity_of(pid)?)? as isize),
            KcallNr::Excpctrl => {
                let action = match args[1] {
                    0 => ExcpAction::Handle,
                    1 => ExcpAction::Defer,
                    _ => return_errno!(Errno::EINVAL),
                };
                excp::control(pid, args[0], action)?;
                Ok(0)
            }
            KcallNr::Excpwait => {
                if args[0] == 0 {
                    return_errno!(Errno::EINVAL);
                }
                let info = excp::wait(pid)?;
                #[cfg(target_os = "none")]
                // SAFETY: the caller handed a writable record of the
                // right shape.
                unsafe {
                    (args[0] as *mut excp::ExcpInfo).write(info)
                };
                #[cfg(not(target_os = "none"))]
                let _ = info;
                Ok(0)
            }
            KcallNr::Excpresume => {
                excp::resume(pid, args[0])?;
                Ok(0)
            }
            KcallNr::Pexit => {
                process::exit(pid);
                Ok(0)
            }
            _ => Err(Error::new(Errno::ENOSYS)),
        }
    })();

    ok_or_retval(result)
}

/// Kernel-call dispatcher, entered from the trap gate.
pub fn do_kcall(nr: u32, arg0: usize, arg1: usize, arg2: usize, arg3: usize, arg4: usize) -> isize {
    let args = [arg0, arg1, arg2, arg3, arg4];

    if let Some(fast) = KcallNr::from_raw(nr).filter(KcallNr::is_fast) {
        return do_fast(fast, args);
    }

    // Slow path: hand the call to the service thread and wait for the
    // reply. The slot is safe because a core publishes at most one call
    // at a time from its trap context.
    // SAFETY: writes happen before the kernel semaphore is raised; the
    // service thread reads only after lowering it.
    unsafe {
        let slot = &mut *SCOREBOARD.0.get();
        slot.pid = process::current();
        slot.nr = nr;
        slot.args = args;
    }

    KERNEL_SEM.up();
    USER_SEM.down();

    // SAFETY: the user semaphore was raised after the reply was stored.
    unsafe { (*SCOREBOARD.0.get()).ret }
}

/// Handles exactly one scoreboard call.
pub fn service_once() {
    KERNEL_SEM.down();

    let (pid, nr, args) = {
        // SAFETY: the kernel semaphore orders this read after the
        // producer's writes.
        let slot = unsafe { &*SCOREBOARD.0.get() };
        (slot.pid, slot.nr, slot.args)
    };

    let ret = dispatch_slow(pid, nr, args);

    // SAFETY: the producer reads the reply only after the user semaphore
    // is raised below.
    unsafe {
        (*SCOREBOARD.0.get()).ret = ret;
    }

    USER_SEM.up();
}

fn service_thread(_arg: usize) {
    loop {
        service_once();
    }
}

/// Brings up the kernel-call dispatcher: the trap entry is wired and the
/// service thread spawned.
pub fn init() {
    arch::set_kcall_entry(do_kcall);

    if thread::create(process::KERNEL_PROCESS, service_thread, 0).is_err() {
        panic!("failed to spawn the kernel-call service thread");
    }
}
