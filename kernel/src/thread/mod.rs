// SPDX-License-Identifier: MPL-2.0

//! Kernel threads.
//!
//! Threads live in a fixed table and are scheduled cooperatively per core,
//! round-robin over a ready queue, with the timer charging the running
//! thread one quantum tick at a time. Whole-process cohorts can be put to
//! sleep and woken together, which is what the process layer uses to
//! suspend and resume a process.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use lazy_static::lazy_static;
use vesper_hal::{
    arch::{self, TaskContext},
    config::{CORES_NUM, INTERRUPT_TIMER, PAGE_SIZE},
    mm::kpool,
    smp,
    trap::interrupt,
};

use crate::{
    config::{PROCESS_QUANTUM, THREAD_MAX},
    prelude::*,
};

/// A thread identifier.
pub type Tid = i32;

/// A process identifier.
pub type Pid = i32;

/// Life-cycle states of a thread.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadState {
    /// The slot is free.
    Unused,
    /// Allocated but not yet runnable.
    Started,
    /// Waiting in the ready queue.
    Ready,
    /// Executing on some core.
    Running,
    /// Parked until woken.
    Sleeping,
    /// Finished; the slot is reclaimed when the process exits.
    Terminated,
}

struct Thread {
    tid: Tid,
    pid: Pid,
    state: ThreadState,
    start: Option<fn(usize)>,
    arg: usize,
    ctx: TaskContext,
    kstack: Vaddr,
}

impl Thread {
    const fn unused() -> Self {
        Thread {
            tid: -1,
            pid: -1,
            state: ThreadState::Unused,
            start: None,
            arg: 0,
            ctx: TaskContext::new(),
            kstack: 0,
        }
    }
}

struct ThreadTable {
    threads: [Thread; THREAD_MAX],
    ready: VecDeque<usize>,
    next_tid: Tid,
    nthreads: usize,
}

impl ThreadTable {
    fn new() -> Self {
        const UNUSED: Thread = Thread::unused();
        Self {
            threads: [UNUSED; THREAD_MAX],
            ready: VecDeque::new(),
            next_tid: 1,
            nthreads: 0,
        }
    }

    fn slot_of(&self, tid: Tid) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| t.state != ThreadState::Unused && t.tid == tid)
    }

    fn drop_from_ready(&mut self, slot: usize) {
        self.ready.retain(|s| *s != slot);
    }
}

lazy_static! {
    static ref THREADS: SpinLock<ThreadTable> = SpinLock::new(ThreadTable::new());
}

/// Slot of the thread running on each core; -1 when none.
static CURRENT: [AtomicI32; CORES_NUM] = {
    const NONE: AtomicI32 = AtomicI32::new(-1);
    [NONE; CORES_NUM]
};

/// Quantum ticks left for the thread running on each core.
static QUANTUM_LEFT: [AtomicU32; CORES_NUM] = {
    const FULL: AtomicU32 = AtomicU32::new(PROCESS_QUANTUM);
    [FULL; CORES_NUM]
};

fn current_slot() -> Option<usize> {
    let slot = CURRENT[smp::core_id()].load(Ordering::Acquire);
    (slot >= 0).then(|| slot as usize)
}

/// The thread identifier of the caller, when it runs on a kernel thread.
pub fn current_tid() -> Option<Tid> {
    let table = THREADS.lock_irq_disabled();
    current_slot().map(|slot| table.threads[slot].tid)
}

/// The process the calling thread belongs to; the kernel process when the
/// caller is not on a kernel thread.
pub fn current_pid() -> Pid {
    let table = THREADS.lock_irq_disabled();
    match current_slot() {
        Some(slot) => table.threads[slot].pid,
        None => 0,
    }
}

/// Like [`current_tid`], but only on bare metal: a hosted caller is an
/// alien thread and must spin instead of parking a kernel thread that is
/// not its own.
pub(crate) fn current_waiter_tid() -> Option<Tid> {
    if cfg!(target_os = "none") {
        current_tid()
    } else {
        None
    }
}

/// Entry shim of every kernel thread.
#[cfg(target_os = "none")]
extern "C" fn thread_entry() {
    let (start, arg) = {
        let table = THREADS.lock_irq_disabled();
        let slot = current_slot().expect("thread entry without a current thread");
        (table.threads[slot].start, table.threads[slot].arg)
    };

    if let Some(start) = start {
        start(arg);
    }

    exit_current();
}

#[cfg(not(target_os = "none"))]
extern "C" fn thread_entry() {
    unreachable!("thread entry on a hosted build");
}

/// Creates a thread for `pid`, executing `start(arg)`.
///
/// The thread is enqueued ready; it runs when the scheduler reaches it.
pub fn create(pid: Pid, start: fn(usize), arg: usize) -> Result<Tid> {
    let kstack = kpool::kpage_get(true)?;

    let mut table = THREADS.lock_irq_disabled();

    let Some(slot) = table
        .threads
        .iter()
        .position(|t| t.state == ThreadState::Unused)
    else {
        let _ = kpool::kpage_put(kstack);
        error!("thread table overflow");
        return_errno!(Errno::EAGAIN);
    };

    let tid = table.next_tid;
    table.next_tid += 1;

    let thread = &mut table.threads[slot];
    thread.tid = tid;
    thread.pid = pid;
    thread.state = ThreadState::Ready;
    thread.start = Some(start);
    thread.arg = arg;
    thread.kstack = kstack;
    thread.ctx = TaskContext::new();
    thread.ctx.prepare(thread_entry as usize, kstack + PAGE_SIZE);

    table.nthreads += 1;
    table.ready.push_back(slot);

    Ok(tid)
}

/// Picks the next ready thread and switches to it.
///
/// When `requeue` is set the calling thread goes back to the tail of the
/// ready queue; otherwise it keeps whatever state the caller set (sleeping
/// or terminated) and simply loses the core.
fn schedule(requeue: bool) {
    let (cur_ctx, next_ctx) = {
        let mut table = THREADS.lock_irq_disabled();
        let core = smp::core_id();

        let cur = current_slot();

        let Some(next) = table.ready.pop_front() else {
            return;
        };

        let cur_ctx = match cur {
            Some(slot) if slot != next => {
                if requeue && table.threads[slot].state == ThreadState::Running {
                    table.threads[slot].state = ThreadState::Ready;
                    table.ready.push_back(slot);
                }
                &mut table.threads[slot].ctx as *mut TaskContext
            }
            Some(slot) => {
                // The only ready thread is the caller itself.
                table.threads[slot].state = ThreadState::Running;
                return;
            }
            None => core::ptr::null_mut(),
        };

        table.threads[next].state = ThreadState::Running;
        CURRENT[core].store(next as i32, Ordering::Release);
        QUANTUM_LEFT[core].store(PROCESS_QUANTUM, Ordering::Relaxed);

        (cur_ctx, &table.threads[next].ctx as *const TaskContext)
    };

    if cur_ctx.is_null() {
        return;
    }

    // SAFETY: both contexts live in the static thread table; the lock is
    // already released, and IRQ state travels with the contexts.
    unsafe { arch::context_switch(cur_ctx, next_ctx) };
}

/// Yields the processor to the next ready thread.
pub fn yield_now() {
    schedule(true);
}

/// Terminates the calling thread. The slot is reclaimed by
/// [`free_all`] when the owning process exits.
pub fn exit_current() -> ! {
    {
        let mut table = THREADS.lock_irq_disabled();
        if let Some(slot) = current_slot() {
            table.threads[slot].state = ThreadState::Terminated;
        }
    }
    schedule(false);
    unreachable!("terminated thread was scheduled again");
}

/// Parks the calling thread until `has_woken` turns true.
///
/// The check and the transition to sleeping happen under the table lock,
/// so a waker that sets the flag and then calls [`wakeup`] cannot slip
/// between them.
pub(crate) fn park_current(has_woken: &core::sync::atomic::AtomicBool) {
    {
        let mut table = THREADS.lock_irq_disabled();
        if has_woken.load(Ordering::Acquire) {
            return;
        }
        let Some(slot) = current_slot() else {
            return;
        };
        table.threads[slot].state = ThreadState::Sleeping;
        table.drop_from_ready(slot);
    }
    schedule(false);
}

/// Wakes the thread `tid` if it is sleeping.
pub(crate) fn wakeup(tid: Tid) {
    let mut table = THREADS.lock_irq_disabled();
    if let Some(slot) = table.slot_of(tid) {
        if table.threads[slot].state == ThreadState::Sleeping {
            table.threads[slot].state = ThreadState::Ready;
            table.ready.push_back(slot);
        }
    }
}

/// Puts every runnable thread of `pid` to sleep.
///
/// When the calling thread belongs to the cohort it gives up the core at
/// the end.
pub fn sleep_all(pid: Pid) {
    let mut reschedule = false;
    {
        let mut table = THREADS.lock_irq_disabled();
        let cur = current_slot();
        for slot in 0..THREAD_MAX {
            let thread = &mut table.threads[slot];
            if thread.pid != pid {
                continue;
            }
            match thread.state {
                ThreadState::Ready | ThreadState::Running | ThreadState::Started => {
                    thread.state = ThreadState::Sleeping;
                    table.drop_from_ready(slot);
                    if cur == Some(slot) {
                        reschedule = true;
                    }
                }
                _ => (),
            }
        }
    }
    if reschedule {
        schedule(false);
    }
}

/// Wakes every sleeping thread of `pid`.
pub fn wakeup_all(pid: Pid) {
    let mut table = THREADS.lock_irq_disabled();
    for slot in 0..THREAD_MAX {
        if table.threads[slot].pid == pid
            && table.threads[slot].state == ThreadState::Sleeping
        {
            table.threads[slot].state = ThreadState::Ready;
            table.ready.push_back(slot);
        }
    }
}

/// Reclaims every thread of `pid`: slots go back to unused and kernel
/// stacks return to the pool.
pub fn free_all(pid: Pid) {
    let mut table = THREADS.lock_irq_disabled();
    for slot in 0..THREAD_MAX {
        if table.threads[slot].state == ThreadState::Unused || table.threads[slot].pid != pid {
            continue;
        }
        table.drop_from_ready(slot);
        let kstack = table.threads[slot].kstack;
        table.threads[slot] = Thread::unused();
        table.nthreads -= 1;
        if kstack != 0 {
            let _ = kpool::kpage_put(kstack);
        }
    }
}

/// Charges the running thread one timer tick; once its quantum drains the
/// core is handed to the next ready thread.
pub fn tick() {
    let core = smp::core_id();
    let left = QUANTUM_LEFT[core].fetch_sub(1, Ordering::Relaxed);
    if left <= 1 {
        QUANTUM_LEFT[core].store(PROCESS_QUANTUM, Ordering::Relaxed);
        yield_now();
    }
}

fn timer_handler() {
    tick();
}

/// Initializes the thread system: the caller becomes thread 0 of the
/// kernel process, and the scheduler tick is hooked to the timer line.
pub fn init() {
    {
        let mut table = THREADS.lock_irq_disabled();
        if table.threads[0].state != ThreadState::Unused {
            return;
        }
        table.threads[0] = Thread {
            tid: 0,
            pid: 0,
            state: ThreadState::Running,
            start: None,
            arg: 0,
            ctx: TaskContext::new(),
            kstack: 0,
        };
        table.nthreads = 1;
    }
    CURRENT[smp::core_id()].store(0, Ordering::Release);
    QUANTUM_LEFT[smp::core_id()].store(PROCESS_QUANTUM, Ordering::Relaxed);

    let _ = interrupt::register(INTERRUPT_TIMER, timer_handler);
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Rebuilds the table from scratch; tests own the env lock.
    pub(crate) fn reset() {
        {
            let mut table = THREADS.lock_irq_disabled();
            for slot in 0..THREAD_MAX {
                if table.threads[slot].kstack != 0 {
                    let _ = kpool::kpage_put(table.threads[slot].kstack);
                }
                table.threads[slot] = Thread::unused();
            }
            table.ready.clear();
            table.next_tid = 1;
            table.nthreads = 0;
        }
        CURRENT[0].store(-1, Ordering::Release);
        init();
    }

    fn noop(_arg: usize) {}

    fn state_of(tid: Tid) -> Option<ThreadState> {
        let table = THREADS.lock_irq_disabled();
        table.slot_of(tid).map(|slot| table.threads[slot].state)
    }

    #[test]
    fn create_enqueues_ready_threads() {
        let _env = crate::test_util::env_lock();
        reset();

        let t1 = create(1, noop, 0).unwrap();
        let t2 = create(1, noop, 0).unwrap();
        assert_ne!(t1, t2);
        assert_eq!(state_of(t1), Some(ThreadState::Ready));
        assert_eq!(state_of(t2), Some(ThreadState::Ready));
    }

    #[test]
    fn yield_rotates_round_robin() {
        let _env = crate::test_util::env_lock();
        reset();

        let t1 = create(1, noop, 0).unwrap();
        let t2 = create(1, noop, 0).unwrap();

        // Boot thread yields: the first created thread takes the core.
        yield_now();
        assert_eq!(current_tid(), Some(t1));
        assert_eq!(state_of(t1), Some(ThreadState::Running));

        yield_now();
        assert_eq!(current_tid(), Some(t2));

        // The boot thread is in the rotation too.
        yield_now();
        assert_eq!(current_tid(), Some(0));
    }

    #[test]
    fn cohort_sleep_and_wakeup() {
        let _env = crate::test_util::env_lock();
        reset();

        let t1 = create(5, noop, 0).unwrap();
        let t2 = create(5, noop, 0).unwrap();
        let other = create(6, noop, 0).unwrap();

        sleep_all(5);
        assert_eq!(state_of(t1), Some(ThreadState::Sleeping));
        assert_eq!(state_of(t2), Some(ThreadState::Sleeping));
        assert_eq!(state_of(other), Some(ThreadState::Ready));

        // Sleeping threads are out of the rotation.
        yield_now();
        assert_eq!(current_tid(), Some(other));

        wakeup_all(5);
        assert_eq!(state_of(t1), Some(ThreadState::Ready));
        assert_eq!(state_of(t2), Some(ThreadState::Ready));
        free_all(5);
        free_all(6);
    }

    #[test]
    fn free_all_reclaims_slots() {
        let _env = crate::test_util::env_lock();
        reset();

        let t1 = create(7, noop, 0).unwrap();
        free_all(7);
        assert_eq!(state_of(t1), None);

        // The slots are reusable immediately.
        for _ in 0..THREAD_MAX - 1 {
            create(8, noop, 0).unwrap();
        }
        free_all(8);
    }

    #[test]
    fn table_overflow_reports_again() {
        let _env = crate::test_util::env_lock();
        reset();

        for _ in 0..THREAD_MAX - 1 {
            create(9, noop, 0).unwrap();
        }
        assert_eq!(
            create(9, noop, 0).map(|_| ()),
            Err(Error::new(Errno::EAGAIN))
        );
        free_all(9);
    }

    #[test]
    fn quantum_rotation_is_fair() {
        let _env = crate::test_util::env_lock();
        reset();

        let t1 = create(1, noop, 0).unwrap();
        let t2 = create(1, noop, 0).unwrap();

        // Park the boot thread so only the cohort rotates.
        {
            let mut table = THREADS.lock_irq_disabled();
            table.threads[0].state = ThreadState::Sleeping;
        }
        schedule(false);
        assert_eq!(current_tid(), Some(t1));

        // Over any window of two quanta both threads must run.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 * PROCESS_QUANTUM {
            tick();
            seen.insert(current_tid().unwrap());
        }
        assert!(seen.contains(&t1));
        assert!(seen.contains(&t2));

        // Recover the boot thread for the tests that follow.
        {
            let mut table = THREADS.lock_irq_disabled();
            table.threads[0].state = ThreadState::Running;
        }
        CURRENT[0].store(0, Ordering::Release);
        free_all(1);
    }
}
