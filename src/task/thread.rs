/// Thread entity and ready queue.
///
/// Owns the per-thread record (priority, status, donation state, sleep
/// deadline) and the kernel-wide singleton that holds every thread plus
/// the ready queue, the tick-sleep list and the dying-thread reaping
/// queue. All of it is guarded by interrupt-disabling alone, in keeping
/// with the uniprocessor model: `KERNEL`'s `spin::Mutex` exists purely so
/// the Rust type system lets us hand out interior mutability to a
/// `'static` singleton, the same role `spin::Mutex` plays for the
/// teacher's own `SCHEDULER`/`PROCESS_TABLE` statics — it never
/// experiences real contention because interrupts are always off while
/// it's held.

extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use super::context::InterruptFrame;
use super::intrinsics;
use super::list::OrderedList;
use super::scheduler;

pub type Tid = u64;

/// Identity of a `Lock`, used only to tag which lock a donation traces
/// back to (§4.6's selective-removal requirement). We use the lock's own
/// address as its identity, the same pointer-identity trick the
/// reference kernel's offset-recovered links rely on.
pub type LockId = usize;

pub const PRI_MIN: u8 = 0;
pub const PRI_DEFAULT: u8 = 31;
pub const PRI_MAX: u8 = 63;

const THREAD_STACK_SIZE: usize = 16 * 1024;

const KERNEL_CS: u64 = 0x08;
const KERNEL_SS: u64 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Ready,
    Blocked,
    Dying,
}

pub struct Thread {
    pub tid: Tid,
    pub name: String,
    pub status: Status,
    pub priority: u8,
    pub base_priority: u8,
    /// Threads currently donating to this one, highest-priority first.
    pub donors: OrderedList<Tid>,
    /// The lock this thread is blocked acquiring, if any.
    pub waiting_lock: Option<LockId>,
    /// Absolute tick at which to wake; meaningful only while on the
    /// sleep list.
    pub wakeup_tick: u64,
    pub(crate) stack_bottom: *mut u8,
    pub(crate) stack_size: usize,
    pub(crate) saved_frame: *mut InterruptFrame,
}

// Thread holds raw pointers but is only ever touched with KERNEL locked,
// which on this uniprocessor kernel is the only form of access control.
unsafe impl Send for Thread {}

/// Read-only snapshot for diagnostics (`scheduler::for_each_thread`).
pub struct ThreadInfo {
    pub tid: Tid,
    pub name: String,
    pub status: Status,
    pub priority: u8,
    pub base_priority: u8,
}

#[derive(Debug)]
pub enum SpawnError {
    OutOfMemory,
}

pub(crate) struct Kernel {
    pub(crate) threads: BTreeMap<Tid, Thread>,
    pub(crate) ready: OrderedList<Tid>,
    pub(crate) sleeping: OrderedList<Tid>,
    pub(crate) dying: VecDeque<Tid>,
    pub(crate) current: Tid,
    pub(crate) idle_tid: Tid,
    next_tid: u64,
    pub(crate) kernel_ticks: u64,
    pub(crate) user_ticks: u64,
    pub(crate) idle_ticks: u64,
    pub(crate) time_slice_ticks: u32,
}

pub(crate) static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);

impl Kernel {
    fn alloc_tid(&mut self) -> Tid {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }

    pub(crate) fn priority_of(&self, tid: Tid) -> u8 {
        self.threads.get(&tid).map(|t| t.priority).unwrap_or(PRI_MIN)
    }

    pub(crate) fn current_thread(&self) -> &Thread {
        self.threads.get(&self.current).expect("current thread missing from table")
    }

    pub(crate) fn current_thread_mut(&mut self) -> &mut Thread {
        let cur = self.current;
        self.threads.get_mut(&cur).expect("current thread missing from table")
    }

    /// Recomputes `priority = max(base_priority, max donor priority)`,
    /// scanning `donors` rather than trusting a cached front — the
    /// alternative the reference design explicitly sanctions, since
    /// donor lists aren't re-sorted on every donor priority change.
    pub(crate) fn recompute_priority(&mut self, tid: Tid) {
        let max_donor = {
            let thread = match self.threads.get(&tid) {
                Some(t) => t,
                None => return,
            };
            thread
                .donors
                .iter()
                .map(|&d| self.priority_of(d))
                .max()
        };
        let base = self.threads.get(&tid).map(|t| t.base_priority).unwrap_or(PRI_MIN);
        let new_priority = base.max(max_donor.unwrap_or(PRI_MIN));
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.priority = new_priority;
        }
    }

    pub(crate) fn insert_ready(&mut self, tid: Tid) {
        let threads = &self.threads;
        self.ready
            .insert_sorted(tid, |a, b| threads.get(a).map(|t| t.priority).unwrap_or(0) > threads.get(b).map(|t| t.priority).unwrap_or(0));
    }
}

fn dealloc_stack(stack_bottom: *mut u8, stack_size: usize) {
    if !stack_bottom.is_null() {
        unsafe {
            let layout = alloc::alloc::Layout::from_size_align(stack_size, 16).unwrap();
            alloc::alloc::dealloc(stack_bottom, layout);
        }
    }
}

pub(crate) fn free_stack(thread: &Thread) {
    dealloc_stack(thread.stack_bottom, thread.stack_size);
}

/// Turns the currently-executing instruction stream into the initial
/// thread: name "main", priority `PRI_DEFAULT`, status RUNNING. Mirrors
/// `system_init()` in spec.md §6.
pub fn system_init() {
    let mut guard = KERNEL.lock();
    let mut k = Kernel {
        threads: BTreeMap::new(),
        ready: OrderedList::new(),
        sleeping: OrderedList::new(),
        dying: VecDeque::new(),
        current: 0,
        idle_tid: 0,
        next_tid: 0,
        kernel_ticks: 0,
        user_ticks: 0,
        idle_ticks: 0,
        time_slice_ticks: 0,
    };
    let tid = k.alloc_tid();
    k.current = tid;
    k.threads.insert(
        tid,
        Thread {
            tid,
            name: String::from("main"),
            status: Status::Running,
            priority: PRI_DEFAULT,
            base_priority: PRI_DEFAULT,
            donors: OrderedList::new(),
            waiting_lock: None,
            wakeup_tick: 0,
            stack_bottom: core::ptr::null_mut(),
            stack_size: 0,
            saved_frame: core::ptr::null_mut(),
        },
    );
    *guard = Some(k);
    crate::serial_println!("thread: main thread initialized (tid={})", tid);
}

/// Allocates a thread record, enqueues it `READY` in priority order, and
/// runs the preemption check. Fails with `SpawnError::OutOfMemory` if the
/// stack allocation fails.
pub fn create(name: String, priority: u8, entry: fn(u64), arg: u64) -> Result<Tid, SpawnError> {
    let layout = alloc::alloc::Layout::from_size_align(THREAD_STACK_SIZE, 16)
        .expect("THREAD_STACK_SIZE/align are valid");
    let stack_bottom = unsafe { alloc::alloc::alloc_zeroed(layout) };
    if stack_bottom.is_null() {
        return Err(SpawnError::OutOfMemory);
    }
    let stack_top = unsafe { stack_bottom.add(THREAD_STACK_SIZE) } as u64;

    let frame_ptr = unsafe {
        let ptr = (stack_top as *mut InterruptFrame).sub(1);
        core::ptr::write(
            ptr,
            InterruptFrame {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rbp: 0,
                rdi: arg,
                rsi: entry as u64,
                rdx: 0,
                rcx: 0,
                rbx: 0,
                rax: 0,
                rip: thread_entry_wrapper as *const () as u64,
                cs: KERNEL_CS,
                rflags: 0x202,
                rsp: stack_top,
                ss: KERNEL_SS,
            },
        );
        ptr
    };

    let tid = intrinsics::with_interrupts_disabled(|| {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        let tid = k.alloc_tid();
        let priority = priority.clamp(PRI_MIN, PRI_MAX);
        k.threads.insert(
            tid,
            Thread {
                tid,
                name,
                status: Status::Ready,
                priority,
                base_priority: priority,
                donors: OrderedList::new(),
                waiting_lock: None,
                wakeup_tick: 0,
                stack_bottom,
                stack_size: THREAD_STACK_SIZE,
                saved_frame: frame_ptr,
            },
        );
        k.insert_ready(tid);
        tid
    });

    preempt_if_outranked();
    Ok(tid)
}

extern "C" fn thread_entry_wrapper(arg: u64, entry_fn: u64) {
    let f: fn(u64) = unsafe { core::mem::transmute(entry_fn) };
    f(arg);
    exit();
}

/// `RUNNING -> BLOCKED`, yields control to the scheduler. Precondition:
/// interrupts disabled by the caller, and the caller has already placed
/// this thread on the appropriate wait queue.
pub fn block() {
    assert!(
        !intrinsics::interrupts_are_enabled(),
        "block() requires interrupts already disabled by the caller"
    );
    scheduler::reschedule(Status::Blocked);
}

/// `BLOCKED -> READY`, ordered insertion into the ready queue. Does not
/// preempt — the caller decides whether to run `preempt_if_outranked`.
pub fn unblock(tid: Tid) {
    intrinsics::with_interrupts_disabled(|| {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        match k.threads.get(&tid).map(|t| t.status) {
            Some(Status::Blocked) => {}
            other => panic!("unblock() on a thread that is not BLOCKED (status={:?})", other),
        }
        k.threads.get_mut(&tid).unwrap().status = Status::Ready;
        k.insert_ready(tid);
    });
}

/// `RUNNING -> READY`, ordered re-insertion, reschedule.
pub fn yield_now() {
    intrinsics::with_interrupts_disabled(|| scheduler::reschedule(Status::Ready));
}

/// `RUNNING -> DYING`, reschedule. Never returns.
pub fn exit() -> ! {
    intrinsics::with_interrupts_disabled(|| scheduler::reschedule(Status::Dying));
    unreachable!("a DYING thread is never rescheduled back in")
}

/// Updates the current thread's `base_priority`, recomputes its
/// effective priority, then runs the preemption check.
pub fn set_priority(priority: u8) {
    let priority = priority.clamp(PRI_MIN, PRI_MAX);
    intrinsics::with_interrupts_disabled(|| {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        let cur = k.current;
        k.threads.get_mut(&cur).unwrap().base_priority = priority;
        k.recompute_priority(cur);
    });
    preempt_if_outranked();
}

/// Returns the current thread's effective priority.
pub fn get_priority() -> u8 {
    intrinsics::with_interrupts_disabled(|| {
        let guard = KERNEL.lock();
        guard.as_ref().expect("kernel not initialized").current_thread().priority
    })
}

pub fn current_tid() -> Tid {
    intrinsics::with_interrupts_disabled(|| {
        let guard = KERNEL.lock();
        guard.as_ref().expect("kernel not initialized").current
    })
}

/// If the ready queue's front outranks the current thread, yields.
pub fn preempt_if_outranked() {
    let should_yield = intrinsics::with_interrupts_disabled(|| {
        let guard = KERNEL.lock();
        let k = guard.as_ref().expect("kernel not initialized");
        match k.ready.front() {
            Some(front) => k.priority_of(front) > k.current_thread().priority,
            None => false,
        }
    });
    if should_yield {
        yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn effective_priority_matches_max_of_base_and_donors() {
        intrinsics::with_interrupts_disabled(|| {
            let mut guard = KERNEL.lock();
            let k = guard.as_mut().unwrap();
            let holder = k.alloc_tid();
            let donor_lo = k.alloc_tid();
            let donor_hi = k.alloc_tid();
            for (tid, prio) in [(holder, 20u8), (donor_lo, 25), (donor_hi, 40)] {
                k.threads.insert(
                    tid,
                    Thread {
                        tid,
                        name: String::from("t"),
                        status: Status::Blocked,
                        priority: prio,
                        base_priority: prio,
                        donors: OrderedList::new(),
                        waiting_lock: None,
                        wakeup_tick: 0,
                        stack_bottom: core::ptr::null_mut(),
                        stack_size: 0,
                        saved_frame: core::ptr::null_mut(),
                    },
                );
            }
            let priorities: alloc::collections::BTreeMap<Tid, u8> =
                k.threads.iter().map(|(&tid, t)| (tid, t.priority)).collect();
            let less = |a: &Tid, b: &Tid| {
                priorities.get(a).copied().unwrap_or(0) > priorities.get(b).copied().unwrap_or(0)
            };
            k.threads.get_mut(&holder).unwrap().donors.insert_sorted(donor_lo, less);
            k.threads.get_mut(&holder).unwrap().donors.insert_sorted(donor_hi, less);
            k.recompute_priority(holder);
            assert_eq!(k.threads.get(&holder).unwrap().priority, 40);
        });
    }
}
