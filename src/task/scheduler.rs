/// Dispatch, preemption bookkeeping, and the dying-thread reaping queue.
///
/// `schedule()` is the single rescheduling point: it runs from an
/// interrupt context (either the real timer IRQ or the software trap
/// `reschedule()` issues on `block`/`yield_now`/`exit`) and returns the
/// `InterruptFrame` the ISR stub should `iretq` into. True register
/// save/restore is the reference design's explicitly out-of-scope
/// "context switching" collaborator; we get it for free by always
/// performing reschedules from inside an interrupt/trap, so the CPU does
/// the saving and `iretq` does the restoring. See `task::context` for
/// the two asm trampolines this relies on.

extern crate alloc;

use alloc::string::String;
use core::sync::atomic::{AtomicBool, Ordering};

use super::context::InterruptFrame;
use super::intrinsics;
use super::sync::semaphore::Semaphore;
use super::thread::{self, Kernel, Status, ThreadInfo, KERNEL, PRI_MIN};

/// Ticks of CPU time a thread gets before the timer ISR requests a yield.
pub const TIME_SLICE: u32 = 4;

static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn is_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::Acquire)
}

/// Creates the idle thread (priority `PRI_MIN`), enables interrupts, and
/// blocks until the idle thread signals that initialization is complete.
/// Mirrors `system_start()` in spec.md §6.
pub fn system_start() {
    static IDLE_READY: Semaphore = Semaphore::new(0);
    IDLE_READY_SEMA.call_once(|| &IDLE_READY);

    let idle_tid = thread::create(String::from("idle"), PRI_MIN, idle_entry, 0)
        .expect("idle thread must spawn");

    intrinsics::with_interrupts_disabled(|| {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        k.idle_tid = idle_tid;
        // The idle thread never sits on the ready queue once running; it
        // was inserted there by `create`, which is fine for its very
        // first dispatch, but it must never be picked by priority (it's
        // always `PRI_MIN` so it naturally loses to anything else ready,
        // and once dispatched the scheduler dispatches it directly by
        // `idle_tid` whenever the ready queue is empty).
    });

    SCHEDULER_ENABLED.store(true, Ordering::Release);
    x86_64::instructions::interrupts::enable();

    IDLE_READY.down();
    crate::serial_println!("scheduler: idle thread ready, preemption enabled");
}

static IDLE_READY_SEMA: spin::Once<&'static Semaphore> = spin::Once::new();

fn idle_entry(_arg: u64) {
    if let Some(sema) = IDLE_READY_SEMA.get() {
        sema.up();
    }
    loop {
        x86_64::instructions::interrupts::enable();
        x86_64::instructions::hlt();
    }
}

/// Sets the current thread's status then triggers a synchronous
/// reschedule via the software trap in `task::context`.
pub(crate) fn reschedule(new_status: Status) {
    {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        let cur = k.current;
        if let Some(t) = k.threads.get_mut(&cur) {
            t.status = new_status;
        }
    }
    super::context::trigger_reschedule();
}

fn reap_locked(k: &mut Kernel) {
    while let Some(tid) = k.dying.pop_front() {
        if let Some(thread) = k.threads.remove(&tid) {
            thread::free_stack(&thread);
        }
    }
}

/// The single rescheduling point (spec.md §4.4), shared by the trap path
/// (`schedule`, lock always free on entry) and the timer-ISR path
/// (`try_schedule`, which must not block).
fn schedule_locked(k: &mut Kernel, current_frame: *mut InterruptFrame) -> *mut InterruptFrame {
    reap_locked(k);

    let prev_tid = k.current;
    let prev_status = k.threads.get(&prev_tid).map(|t| t.status);
    if let Some(prev) = k.threads.get_mut(&prev_tid) {
        prev.saved_frame = current_frame;
    }
    match prev_status {
        Some(Status::Dying) => k.dying.push_back(prev_tid),
        Some(Status::Ready) => k.insert_ready(prev_tid),
        _ => {}
    }

    let next_tid = k.ready.pop_front().unwrap_or(k.idle_tid);
    k.current = next_tid;
    k.time_slice_ticks = 0;

    match k.threads.get_mut(&next_tid) {
        Some(next) => {
            next.status = Status::Running;
            next.saved_frame
        }
        None => current_frame,
    }
}

/// Entered from the software trap `block`/`yield_now`/`exit` issue. The
/// kernel lock is always free on entry since `reschedule()` drops it
/// before trapping.
pub(crate) fn schedule(current_frame: *mut InterruptFrame) -> *mut InterruptFrame {
    let mut guard = KERNEL.lock();
    let k = guard.as_mut().expect("kernel not initialized");
    schedule_locked(k, current_frame)
}

/// Called from the real timer ISR. Uses `try_lock` so a tick that lands
/// while the kernel lock is already held degrades to "no switch this
/// tick" instead of deadlocking.
pub(crate) fn try_schedule(current_frame: *mut InterruptFrame) -> Option<*mut InterruptFrame> {
    let mut guard = KERNEL.try_lock()?;
    let k = guard.as_mut()?;
    Some(schedule_locked(k, current_frame))
}

/// Called once per timer tick (100 Hz) from the ISR, before the sleep
/// list is drained for this tick. Tracks per-bucket tick counts and
/// requests a yield on ISR return once the running thread exhausts its
/// time slice.
///
/// `kernel_ticks` stays at zero: this kernel has no separate user-mode
/// execution context to distinguish from kernel-mode (user-process
/// loading is out of scope), so every non-idle tick is a `user_ticks`
/// tick. The field is kept for diagnostic symmetry with the three-way
/// split the original tracks.
pub(crate) fn thread_tick() -> bool {
    let mut guard = KERNEL.lock();
    let k = guard.as_mut().expect("kernel not initialized");
    if k.current == k.idle_tid {
        k.idle_ticks = k.idle_ticks.saturating_add(1);
    } else {
        k.user_ticks = k.user_ticks.saturating_add(1);
    }
    k.time_slice_ticks += 1;
    k.time_slice_ticks >= TIME_SLICE
}

/// Invoked by a request-to-yield decision made in `thread_tick`. Marks
/// the running thread `READY` so the next tick's `try_schedule` moves on
/// to whoever's next, without requiring a second trap.
pub(crate) fn expire_time_slice(frame: *mut InterruptFrame) -> *mut InterruptFrame {
    {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        let cur = k.current;
        if cur != k.idle_tid {
            if let Some(t) = k.threads.get_mut(&cur) {
                t.status = Status::Ready;
            }
        }
    }
    try_schedule(frame).unwrap_or(frame)
}

/// Diagnostic enumeration over all live threads, grounded in the
/// teacher's `ProcessTable::list`.
pub fn for_each_thread(mut f: impl FnMut(&ThreadInfo)) {
    intrinsics::with_interrupts_disabled(|| {
        let guard = KERNEL.lock();
        let k = guard.as_ref().expect("kernel not initialized");
        for thread in k.threads.values() {
            let info = ThreadInfo {
                tid: thread.tid,
                name: thread.name.clone(),
                status: thread.status,
                priority: thread.priority,
                base_priority: thread.base_priority,
            };
            f(&info);
        }
    });
}

pub fn tick_counts() -> (u64, u64, u64) {
    intrinsics::with_interrupts_disabled(|| {
        let guard = KERNEL.lock();
        let k = guard.as_ref().expect("kernel not initialized");
        (k.idle_ticks, k.kernel_ticks, k.user_ticks)
    })
}

/// An alternate multi-level feedback-queue mode, present as a flag only:
/// selecting it has no scheduling effect. The reference kernel's own
/// `bsd` scheduler math is explicitly out of scope (spec.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    StrictPriority,
    MultiLevelFeedback,
}

static MODE: spin::Mutex<SchedulerMode> = spin::Mutex::new(SchedulerMode::StrictPriority);

pub fn set_mode(mode: SchedulerMode) {
    if mode == SchedulerMode::MultiLevelFeedback {
        crate::serial_println!("scheduler: MLFQ mode selected but not implemented, ignoring");
        return;
    }
    *MODE.lock() = mode;
}

pub fn mode() -> SchedulerMode {
    *MODE.lock()
}
