/// Tick-driven sleep list (spec.md §4.8): lets a thread block itself until
/// a given number of timer ticks have elapsed, without busy-waiting.
///
/// Sleepers are kept in `Kernel::sleeping`, ordered ascending by
/// `wakeup_tick` (earliest wakeup first), so the timer ISR only has to
/// look at the front of the list each tick and can stop as soon as it
/// finds an entry that hasn't come due yet.

extern crate alloc;

use core::sync::atomic::{AtomicU64, Ordering};

use super::intrinsics;
use super::thread::{self, Status, Tid, KERNEL};

/// Ticks since boot, incremented once per timer interrupt. Mirrors the
/// reference kernel's own tick counter; kept here (rather than reusing
/// `interrupts::TICK_COUNT` directly) so `task::` has no dependency on
/// the interrupt-controller module, only the other way around.
static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn timer_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Ticks elapsed since `then` (a value previously returned by `timer_ticks`).
pub fn timer_elapsed(then: u64) -> u64 {
    timer_ticks().wrapping_sub(then)
}

/// Blocks the current thread until at least `ticks` timer interrupts have
/// fired. `ticks == 0` returns immediately without yielding.
pub fn sleep(ticks: u64) {
    if ticks == 0 {
        return;
    }
    let wake_at = timer_ticks() + ticks;
    intrinsics::with_interrupts_disabled(|| {
        let mut guard = KERNEL.lock();
        let k = guard.as_mut().expect("kernel not initialized");
        let cur = k.current;
        k.threads.get_mut(&cur).unwrap().wakeup_tick = wake_at;
        let threads = &k.threads;
        k.sleeping.insert_sorted(cur, |a, b| {
            threads.get(a).map(|t| t.wakeup_tick).unwrap_or(u64::MAX)
                < threads.get(b).map(|t| t.wakeup_tick).unwrap_or(u64::MAX)
        });
        drop(guard);
        thread::block();
    });
}

/// Called once per timer tick, after `scheduler::thread_tick`. Advances
/// the tick counter, then pops and unblocks every sleeper whose deadline
/// has arrived, stopping at the first one that hasn't — the list is kept
/// sorted, so nothing past that point can be due either.
pub(crate) fn wake_expired() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    let mut guard = KERNEL.lock();
    let k = guard.as_mut().expect("kernel not initialized");
    let mut woken: alloc::vec::Vec<Tid> = alloc::vec::Vec::new();
    while let Some(tid) = k.sleeping.front() {
        let due = k
            .threads
            .get(&tid)
            .map(|t| t.wakeup_tick <= now)
            .unwrap_or(true);
        if !due {
            break;
        }
        k.sleeping.pop_front();
        woken.push(tid);
    }
    for tid in woken {
        if let Some(t) = k.threads.get_mut(&tid) {
            if t.status == Status::Blocked {
                t.status = Status::Ready;
                k.insert_ready(tid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn timer_elapsed_reports_ticks_since_snapshot() {
        let before = timer_ticks();
        TICKS.fetch_add(3, Ordering::Relaxed);
        assert_eq!(timer_elapsed(before), 3);
    }
}
