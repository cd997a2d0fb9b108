// SPDX-License-Identifier: MPL-2.0

//! Processes.
//!
//! A process binds an identity, an address space and a set of threads.
//! The table is fixed-size; slot 0 is the kernel process, which owns the
//! root identity and the root address space and never exits. User
//! processes are created from an ELF32 image recorded as a boot module and
//! enter user mode at the base of the user address range.

pub mod elf;

use vesper_hal::{
    config::{PAGE_SIZE, USER_BASE_VIRT, USER_END_VIRT},
    mm::vmem,
};

use crate::{
    config::PROCESS_MAX,
    iam::{self, IdentityId},
    prelude::*,
    thread::{self, Pid, Tid},
};

/// The process identifier of the kernel process.
pub const KERNEL_PROCESS: Pid = 0;

#[derive(Clone, Copy)]
struct Pcb {
    pid: Pid,
    active: bool,
    identity: Option<IdentityId>,
    image: Option<ImageRef>,
    vmem: Option<vmem::Vmem>,
    /// Bitmap of attached user stack pages, top of user space downwards.
    ustackmap: usize,
    /// Main thread.
    tid: Tid,
}

/// Where a process image lives in kernel-reachable memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ImageRef {
    base: Vaddr,
    size: usize,
}

impl ImageRef {
    /// # Safety
    ///
    /// The referenced module must stay resident for the process lifetime.
    unsafe fn as_slice(&self) -> &'static [u8] {
        core::slice::from_raw_parts(self.base as *const u8, self.size)
    }
}

impl Pcb {
    const fn free() -> Self {
        Pcb {
            pid: -1,
            active: false,
            identity: None,
            image: None,
            vmem: None,
            ustackmap: 0,
            tid: -1,
        }
    }
}

struct ProcessTable {
    processes: [Pcb; PROCESS_MAX],
    next_pid: Pid,
}

static PROCESSES: SpinLock<ProcessTable> = SpinLock::new(ProcessTable {
    processes: [Pcb::free(); PROCESS_MAX],
    next_pid: 1,
});

/// Checks whether `pid` names an active process.
pub fn is_valid(pid: Pid) -> bool {
    let table = PROCESSES.lock_irq_disabled();
    table
        .processes
        .iter()
        .any(|p| p.active && p.pid == pid)
}

fn slot_of(table: &ProcessTable, pid: Pid) -> Option<usize> {
    table
        .processes
        .iter()
        .position(|p| p.active && p.pid == pid)
}

/// The process of the calling thread.
pub fn current() -> Pid {
    thread::current_pid()
}

/// The identity bound to `pid`.
pub fn identity_of(pid: Pid) -> Result<IdentityId> {
    let table = PROCESSES.lock_irq_disabled();
    let slot = slot_of(&table, pid).ok_or(Error::new(Errno::ENOENT))?;
    table.processes[slot]
        .identity
        .ok_or(Error::new(Errno::ENOENT))
}

/// The address space bound to `pid`.
pub fn vmem_of(pid: Pid) -> Result<vmem::Vmem> {
    let table = PROCESSES.lock_irq_disabled();
    let slot = slot_of(&table, pid).ok_or(Error::new(Errno::ENOENT))?;
    table.processes[slot].vmem.ok_or(Error::new(Errno::ENOENT))
}

/// Runs in the fresh kernel context of a new process, ahead of user mode:
/// loads the image and attaches one page of user stack just below the top
/// of user space.
fn do_setup(pid: Pid) -> Result<Vaddr> {
    let (image, space) = {
        let table = PROCESSES.lock_irq_disabled();
        let slot = slot_of(&table, pid).ok_or(Error::new(Errno::ENOENT))?;
        (
            table.processes[slot].image.ok_or(Error::new(Errno::ENOENT))?,
            table.processes[slot].vmem.ok_or(Error::new(Errno::ENOENT))?,
        )
    };

    // Attach the segment pages, then pour the image into them.
    // SAFETY: boot modules stay resident.
    let bytes = unsafe { image.as_slice() };
    let info = elf::parse(bytes)?;
    for segment in &info.segments {
        let mut addr = segment.vaddr & !(PAGE_SIZE - 1);
        let end = segment.vaddr + segment.mem_size;
        while addr < end {
            vmem::attach(space, addr, PAGE_SIZE)?;
            addr += PAGE_SIZE;
        }
    }

    let entry = elf::load(bytes)?;
    if entry != USER_BASE_VIRT {
        return_errno_with_message!(Errno::EINVAL, "image entry is not the user base");
    }

    let ustack = USER_END_VIRT - PAGE_SIZE;
    vmem::attach(space, ustack, PAGE_SIZE)?;

    {
        let mut table = PROCESSES.lock_irq_disabled();
        if let Some(slot) = slot_of(&table, pid) {
            table.processes[slot].ustackmap |= 1;
        }
    }

    Ok(entry)
}

/// Start routine of the main thread of a user process.
fn user_thread_entry(pid_arg: usize) {
    let pid = pid_arg as Pid;

    match do_setup(pid) {
        Ok(_entry) => {
            #[cfg(target_os = "none")]
            {
                // The port enters user mode by returning through the trap
                // frame the thread was built with; reaching this point
                // hands control to the image at the user base.
            }
        }
        Err(err) => {
            error!("process {} setup failed: {:?}", pid, err);
            exit(pid);
        }
    }
}

/// Creates a process from `image`, an ELF32 executable resident in kernel
/// memory.
///
/// Allocates a control block, an address space cloned from the root's
/// kernel mappings, and an identity cloned from the kernel's; the main
/// thread starts at the user base once `do_setup` ran.
pub fn create(image_base: Vaddr, image_size: usize) -> Result<Pid> {
    let (pid, slot) = {
        let mut table = PROCESSES.lock_irq_disabled();
        let Some(slot) = table.processes.iter().position(|p| !p.active) else {
            error!("process table overflow");
            return_errno!(Errno::EAGAIN);
        };
        let pid = table.next_pid;
        table.next_pid += 1;
        table.processes[slot].active = true;
        table.processes[slot].pid = pid;
        (pid, slot)
    };

    let result = (|| -> Result<Tid> {
        let space = vmem::create()?;

        let identity = match iam::new(iam::root()) {
            Ok(identity) => identity,
            Err(err) => {
                let _ = vmem::destroy(space);
                return Err(err);
            }
        };

        let tid = match thread::create(pid, user_thread_entry, pid as usize) {
            Ok(tid) => tid,
            Err(err) => {
                let _ = iam::drop_(identity);
                let _ = vmem::destroy(space);
                return Err(err);
            }
        };

        let mut table = PROCESSES.lock_irq_disabled();
        let pcb = &mut table.processes[slot];
        pcb.identity = Some(identity);
        pcb.vmem = Some(space);
        pcb.image = Some(ImageRef {
            base: image_base,
            size: image_size,
        });
        pcb.ustackmap = 0;
        pcb.tid = tid;
        Ok(tid)
    })();

    match result {
        Ok(_) => Ok(pid),
        Err(err) => {
            let mut table = PROCESSES.lock_irq_disabled();
            table.processes[slot] = Pcb::free();
            Err(err)
        }
    }
}

/// Tears a process down: threads are reclaimed, the identity dropped and
/// the address space destroyed. The kernel process is untouchable.
pub fn exit(pid: Pid) {
    if pid == KERNEL_PROCESS {
        panic!("kernel process cannot exit");
    }

    let (identity, space) = {
        let mut table = PROCESSES.lock_irq_disabled();
        let Some(slot) = slot_of(&table, pid) else {
            return;
        };
        let pcb = &mut table.processes[slot];
        let identity = pcb.identity.take();
        let space = pcb.vmem.take();
        *pcb = Pcb::free();
        (identity, space)
    };

    thread::free_all(pid);

    if let Some(identity) = identity {
        if identity != iam::root() {
            let _ = iam::drop_(identity);
        }
    }

    if let Some(space) = space {
        if space != vmem::Vmem::root() {
            // Drop whatever mappings the process left behind, then the
            // space itself.
            let _ = vmem::clear(space);
            let _ = vmem::destroy(space);
        }
    }
}

/// Terminates the calling process and gives up the core.
pub fn exit_current() -> ! {
    let pid = current();
    exit(pid);
    thread::yield_now();
    unreachable!("exited process was scheduled again");
}

/// Suspends every thread of the calling process.
pub fn sleep() {
    thread::sleep_all(current());
}

/// Resumes every thread of `pid`.
pub fn wakeup(pid: Pid) {
    thread::wakeup_all(pid);
}

/// Initializes the process system: slot 0 becomes the kernel process with
/// the root identity and the root address space, and the thread system is
/// brought up with it.
pub fn init() {
    info!("initializing process system...");

    {
        let mut table = PROCESSES.lock_irq_disabled();
        let kernel = &mut table.processes[0];
        if kernel.active {
            return;
        }
        kernel.pid = KERNEL_PROCESS;
        kernel.active = true;
        kernel.identity = Some(iam::root());
        kernel.vmem = Some(vmem::Vmem::root());
        kernel.image = None;
        kernel.ustackmap = 0;
        kernel.tid = 0;
    }

    thread::init();
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Resets processes, threads and boot modules for a scenario test.
    pub(crate) fn reset() {
        {
            let mut table = PROCESSES.lock_irq_disabled();
            for slot in 0..PROCESS_MAX {
                table.processes[slot] = Pcb::free();
            }
            table.next_pid = 1;
        }
        vesper_hal::init();
        crate::thread::test::reset();
        crate::iam::init();
        init();
    }

    fn sample_module() -> (Vaddr, usize) {
        use alloc::boxed::Box;
        let image = Box::leak(elf::test::sample_image().into_boxed_slice());
        (image.as_ptr() as Vaddr, image.len())
    }

    #[test]
    fn create_binds_identity_vmem_and_thread() {
        let _env = crate::test_util::env_lock();
        reset();

        let (base, size) = sample_module();
        let pid = create(base, size).unwrap();
        assert!(pid > 0);
        assert!(is_valid(pid));

        let identity = identity_of(pid).unwrap();
        assert_ne!(identity, iam::root());
        assert_eq!(crate::iam::getuid(identity), Ok(0));

        let space = vmem_of(pid).unwrap();
        assert_ne!(space, vmem::Vmem::root());

        exit(pid);
        assert!(!is_valid(pid));
        // The cloned identity died with the process.
        assert!(crate::iam::getuid(identity).is_err());
    }

    #[test]
    fn exit_releases_table_slots() {
        let _env = crate::test_util::env_lock();
        reset();

        let (base, size) = sample_module();
        let mut pids = Vec::new();
        for _ in 0..PROCESS_MAX - 1 {
            pids.push(create(base, size).unwrap());
        }
        // Table is full now.
        assert_eq!(
            create(base, size).map(|_| ()),
            Err(Error::new(Errno::EAGAIN))
        );

        for pid in pids {
            exit(pid);
        }
        assert!(create(base, size).is_ok());
    }

    #[test]
    fn setup_loads_image_and_stack() {
        let _env = crate::test_util::env_lock();
        reset();

        let (base, size) = sample_module();
        let pid = create(base, size).unwrap();
        let space = vmem_of(pid).unwrap();

        do_setup(pid).unwrap();

        // The image page and the stack page are mapped.
        assert!(vmem::info(space, USER_BASE_VIRT).is_ok());
        assert!(vmem::info(space, USER_END_VIRT - PAGE_SIZE).is_ok());

        exit(pid);
    }

    #[test]
    fn kernel_process_is_protected() {
        let _env = crate::test_util::env_lock();
        reset();

        assert!(is_valid(KERNEL_PROCESS));
        assert_eq!(identity_of(KERNEL_PROCESS).unwrap(), iam::root());
        assert_eq!(vmem_of(KERNEL_PROCESS).unwrap(), vmem::Vmem::root());
    }
}
