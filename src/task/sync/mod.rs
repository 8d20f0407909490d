/// Synchronization primitives built atop `Semaphore` (spec.md §4.5-4.7).
pub mod condvar;
pub mod lock;
pub mod semaphore;
