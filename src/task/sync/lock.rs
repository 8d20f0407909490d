/// Mutual-exclusion lock with priority donation (spec.md §4.6).
///
/// Built on a binary `Semaphore` exactly like the reference design's own
/// `lock` atop its `sema_down`/`sema_up`: the donation bookkeeping lives
/// entirely in `acquire`/`release`, layered on top of an otherwise plain
/// semaphore wait/signal.

extern crate alloc;

use alloc::collections::BTreeMap;

use super::semaphore::Semaphore;
use crate::task::intrinsics;
use crate::task::thread::{self, Tid, KERNEL};

/// Caps the length of a donation chain walked on `acquire`, guarding
/// against pathological nested-lock cycles building an unbounded chain.
pub const MAX_DONATION_DEPTH: usize = 8;

/// Maps a lock's identity to whoever currently holds it. `Lock` itself
/// has no way to look up the *next* lock in a donation chain from a bare
/// `LockId`, since a thread's `waiting_lock` only records an address, not
/// a reference — this registry is what lets `acquire`'s walk hop from
/// "the lock I'm blocked on" to "who holds it" to "what's *that* thread
/// blocked on", without needing owning references between locks.
static LOCK_HOLDERS: spin::Mutex<BTreeMap<usize, Tid>> = spin::Mutex::new(BTreeMap::new());

pub struct Lock {
    sema: Semaphore,
    holder: spin::Mutex<Option<Tid>>,
}

impl Lock {
    pub const fn new() -> Self {
        Lock {
            sema: Semaphore::new(1),
            holder: spin::Mutex::new(None),
        }
    }

    /// Lock identity used to tag donations so `release` can selectively
    /// remove only the donors waiting on *this* lock.
    fn id(&self) -> usize {
        self as *const _ as usize
    }

    /// Acquires the lock. If it's held, registers the current thread as a
    /// *direct* donor of the holder (satisfying spec.md §8's invariant
    /// `t ∈ L.holder.donors` for the lock `t` is actually blocked on, and
    /// no other), then walks the rest of the chain — holder-of-holder,
    /// and so on, up to `MAX_DONATION_DEPTH` hops — purely to recompute
    /// each ancestor's effective priority from its own (already-updated)
    /// donors, without adding `cur` to any list beyond the direct one.
    /// This is what keeps `release` correct: an ancestor two hops up
    /// never holds a donor entry it would need to know how to selectively
    /// drop later.
    pub fn acquire(&self) {
        assert!(
            !self.lock_held_by_current_thread(),
            "acquire() is not reentrant"
        );

        let cur = thread::current_tid();
        let lock_id = self.id();
        intrinsics::with_interrupts_disabled(|| {
            let mut guard = KERNEL.lock();
            let k = guard.as_mut().expect("kernel not initialized");
            if let Some(t) = k.threads.get_mut(&cur) {
                t.waiting_lock = Some(lock_id);
            }

            let direct_holder = LOCK_HOLDERS.lock().get(&lock_id).copied();
            let Some(direct_holder) = direct_holder else {
                return;
            };

            let priorities: BTreeMap<Tid, u8> =
                k.threads.iter().map(|(&tid, th)| (tid, th.priority)).collect();
            let less = |a: &Tid, b: &Tid| {
                priorities.get(a).copied().unwrap_or(0) > priorities.get(b).copied().unwrap_or(0)
            };
            if let Some(holder) = k.threads.get_mut(&direct_holder) {
                if !holder.donors.contains(cur) {
                    holder.donors.insert_sorted(cur, less);
                }
            }
            k.recompute_priority(direct_holder);

            let mut current_lock_id = lock_id;
            let mut current_holder = direct_holder;
            for _ in 0..MAX_DONATION_DEPTH.saturating_sub(1) {
                match k.threads.get(&current_holder).and_then(|t| t.waiting_lock) {
                    Some(next_lock_id) if next_lock_id != current_lock_id => {
                        let next_holder = LOCK_HOLDERS.lock().get(&next_lock_id).copied();
                        match next_holder {
                            Some(next_holder) => {
                                // `current_holder` is already a registered
                                // donor of `next_holder` from when it
                                // itself blocked on `next_lock_id`; just
                                // refresh `next_holder`'s effective
                                // priority now that `current_holder`'s own
                                // priority may have just gone up.
                                k.recompute_priority(next_holder);
                                current_lock_id = next_lock_id;
                                current_holder = next_holder;
                            }
                            None => break,
                        }
                    }
                    _ => break,
                }
            }
        });

        self.sema.down();

        LOCK_HOLDERS.lock().insert(lock_id, cur);
        intrinsics::with_interrupts_disabled(|| {
            *self.holder.lock() = Some(cur);
            let mut guard = KERNEL.lock();
            let k = guard.as_mut().expect("kernel not initialized");
            if let Some(t) = k.threads.get_mut(&cur) {
                t.waiting_lock = None;
            }
        });
    }

    /// Acquires without donating; fails rather than blocking if the lock
    /// is currently held.
    pub fn try_acquire(&self) -> bool {
        if self.sema.try_down() {
            let cur = thread::current_tid();
            *self.holder.lock() = Some(cur);
            LOCK_HOLDERS.lock().insert(self.id(), cur);
            true
        } else {
            false
        }
    }

    /// Releases the lock, removing only the donations tagged with this
    /// lock's identity from the holder's donor list (other locks' donors
    /// stay in place), recomputing effective priority, and signaling the
    /// semaphore.
    pub fn release(&self) {
        assert!(
            self.lock_held_by_current_thread(),
            "release() by a thread that doesn't hold the lock"
        );
        let lock_id = self.id();
        let holder_tid = *self.holder.lock();
        *self.holder.lock() = None;
        LOCK_HOLDERS.lock().remove(&lock_id);

        if let Some(holder_tid) = holder_tid {
            intrinsics::with_interrupts_disabled(|| {
                let mut guard = KERNEL.lock();
                let k = guard.as_mut().expect("kernel not initialized");

                let waiting_on: BTreeMap<Tid, Option<usize>> =
                    k.threads.iter().map(|(&tid, t)| (tid, t.waiting_lock)).collect();
                let donors_waiting_here: alloc::vec::Vec<Tid> = match k.threads.get(&holder_tid) {
                    Some(holder) => holder
                        .donors
                        .iter()
                        .copied()
                        .filter(|d| waiting_on.get(d).copied().flatten() == Some(lock_id))
                        .collect(),
                    None => alloc::vec::Vec::new(),
                };

                if let Some(t) = k.threads.get_mut(&holder_tid) {
                    for donor in donors_waiting_here {
                        t.donors.remove(donor);
                    }
                }
                k.recompute_priority(holder_tid);
            });
        }

        self.sema.up();
    }

    pub fn lock_held_by_current_thread(&self) -> bool {
        *self.holder.lock() == Some(thread::current_tid())
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
