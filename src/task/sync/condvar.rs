/// Condition variable with Mesa-style semantics (spec.md §4.7): `wait`
/// always reacquires the associated lock before returning, so callers
/// must re-check their predicate in a loop, same as the reference
/// design's own `cond_wait`/`cond_signal` pair.
///
/// Each call to `wait` parks on its own private binary semaphore rather
/// than the condvar's internal state directly — the same per-waiter-slot
/// trick the reference design uses (a semaphore embedded in a stack-local
/// "waiter" record) so `signal` can wake exactly one parked thread
/// without racing threads still arriving in `wait`. The slot is kept
/// alive past its removal from the waiter queue via `Arc`, since `signal`
/// pops it from the queue before the waiting thread's `down()` returns.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::lock::Lock;
use super::semaphore::Semaphore;
use crate::task::intrinsics;
use crate::task::thread::{self, Tid, KERNEL};

struct Waiter {
    tid: Tid,
    sema: Arc<Semaphore>,
}

pub struct CondVar {
    waiters: spin::Mutex<VecDeque<Waiter>>,
}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            waiters: spin::Mutex::new(VecDeque::new()),
        }
    }

    /// Releases `lock`, blocks until signaled, then reacquires `lock`
    /// before returning. The caller must hold `lock` on entry and must
    /// re-check its wait predicate after `wait` returns, since a second
    /// thread could race to observe the condition first.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.lock_held_by_current_thread(),
            "wait() requires the caller to already hold the lock"
        );

        let tid = thread::current_tid();
        let sema = Arc::new(Semaphore::new(0));

        intrinsics::with_interrupts_disabled(|| {
            let mut waiters = self.waiters.lock();
            let guard = KERNEL.lock();
            let k = guard.as_ref().expect("kernel not initialized");
            let my_priority = k.priority_of(tid);
            let pos = waiters
                .iter()
                .position(|w| my_priority > k.priority_of(w.tid))
                .unwrap_or(waiters.len());
            drop(guard);
            waiters.insert(pos, Waiter { tid, sema: sema.clone() });
        });

        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wakes the single highest-priority waiter, if any. Re-sorts first,
    /// in case donations changed priorities while waiters were parked.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.lock_held_by_current_thread(),
            "signal() requires the caller to hold the associated lock"
        );
        let woken = intrinsics::with_interrupts_disabled(|| {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                return None;
            }
            let guard = KERNEL.lock();
            let k = guard.as_ref().expect("kernel not initialized");
            let mut items: alloc::vec::Vec<Waiter> = waiters.drain(..).collect();
            items.sort_by(|a, b| k.priority_of(b.tid).cmp(&k.priority_of(a.tid)));
            drop(guard);
            let front = items.remove(0);
            waiters.extend(items);
            Some(front.sema)
        });
        if let Some(sema) = woken {
            sema.up();
        }
    }

    /// Wakes every waiter, highest priority first.
    pub fn broadcast(&self, lock: &Lock) {
        while !self.waiters.lock().is_empty() {
            self.signal(lock);
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
