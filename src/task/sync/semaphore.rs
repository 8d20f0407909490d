/// Counting semaphore (spec.md §4.5): the primitive every other wait
/// primitive in this module is built from — `Lock` is a semaphore plus
/// donation bookkeeping, `CondVar` parks each waiter on its own
/// binary semaphore.

extern crate alloc;

use alloc::collections::BTreeMap;

use crate::task::intrinsics;
use crate::task::list::OrderedList;
use crate::task::thread::{self, Tid, KERNEL};

pub struct Semaphore {
    inner: spin::Mutex<Inner>,
}

struct Inner {
    value: u64,
    waiters: OrderedList<Tid>,
}

impl Semaphore {
    pub const fn new(value: u64) -> Self {
        Semaphore {
            inner: spin::Mutex::new(Inner {
                value,
                waiters: OrderedList::new(),
            }),
        }
    }

    /// Blocks until the semaphore's value is positive, then decrements it.
    /// Precondition: not called from interrupt context (it may block).
    ///
    /// `up` only unblocks a waiter; it doesn't hand it a decrement
    /// directly, so a woken thread loops back and re-checks the value
    /// itself. This is what makes re-parking safe if another `down`
    /// raced in and took the value first.
    pub fn down(&self) {
        loop {
            let acquired = intrinsics::with_interrupts_disabled(|| {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return true;
                }
                let cur = thread::current_tid();
                let priorities: BTreeMap<Tid, u8> = {
                    let guard = KERNEL.lock();
                    let k = guard.as_ref().expect("kernel not initialized");
                    k.threads.iter().map(|(&tid, t)| (tid, t.priority)).collect()
                };
                let less = |a: &Tid, b: &Tid| {
                    priorities.get(a).copied().unwrap_or(0) > priorities.get(b).copied().unwrap_or(0)
                };
                inner.waiters.insert_sorted(cur, less);
                drop(inner);
                thread::block();
                false
            });
            if acquired {
                return;
            }
        }
    }

    /// Non-blocking variant, safe to call from interrupt context.
    pub fn try_down(&self) -> bool {
        intrinsics::with_interrupts_disabled(|| {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Increments the value and, if anyone is waiting, unblocks the
    /// highest-priority waiter (re-sorting first, in case donations
    /// changed priorities while they were parked) and runs the
    /// preemption check. Nothing in this kernel currently calls `up`
    /// from inside the timer ISR itself (the tick handler drains the
    /// sleep list and requests time-slice yields directly, without going
    /// through a semaphore), so the preemption check's software trap is
    /// always taken from ordinary thread context.
    pub fn up(&self) {
        let woke = intrinsics::with_interrupts_disabled(|| {
            let mut inner = self.inner.lock();
            inner.value += 1;
            if inner.waiters.is_empty() {
                return None;
            }
            let priorities: BTreeMap<Tid, u8> = {
                let guard = KERNEL.lock();
                let k = guard.as_ref().expect("kernel not initialized");
                k.threads.iter().map(|(&tid, t)| (tid, t.priority)).collect()
            };
            let less = |a: &Tid, b: &Tid| {
                priorities.get(a).copied().unwrap_or(0) > priorities.get(b).copied().unwrap_or(0)
            };
            inner.waiters.sort_by(less);
            inner.waiters.pop_front()
        });
        if let Some(tid) = woke {
            thread::unblock(tid);
            thread::preempt_if_outranked();
        }
    }
}
