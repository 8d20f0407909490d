/// Interrupt-gate intrinsics: the single mechanism the scheduler uses to
/// obtain atomicity against the timer ISR on this uniprocessor kernel.
///
/// Every critical section in `task::` follows the same shape: save the
/// prior interrupt-enable state, disable, do the work, restore the prior
/// state. Because `restore` is handed back exactly what `disable` read,
/// nested disable/restore pairs compose correctly — an inner disable
/// reports "already disabled" and its matching restore is then a no-op.

use core::sync::atomic::{compiler_fence, Ordering};

/// Returns whether maskable interrupts are currently enabled.
#[inline]
pub fn interrupts_are_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

/// Disables interrupts and returns the prior enabled state, so the caller
/// can hand it back to `restore_interrupts` later.
#[inline]
pub fn disable_interrupts() -> bool {
    let prior = interrupts_are_enabled();
    x86_64::instructions::interrupts::disable();
    prior
}

/// Restores interrupts to the level `prior_enabled` describes. Restoring
/// `false` (disabled) on top of an already-disabled gate is a no-op.
#[inline]
pub fn restore_interrupts(prior_enabled: bool) {
    if prior_enabled {
        x86_64::instructions::interrupts::enable();
    }
}

/// Runs `f` with interrupts disabled, restoring the prior level afterward.
/// This is the save/disable/work/restore pattern spelled out once so call
/// sites don't have to repeat it.
#[inline]
pub fn with_interrupts_disabled<R>(f: impl FnOnce() -> R) -> R {
    let prior = disable_interrupts();
    let result = f();
    restore_interrupts(prior);
    result
}

/// Forbids the compiler from reordering memory accesses across this point.
/// Used by the busy-wait loops in `task::scheduler::sleep_ms`-style spins.
#[inline]
pub fn barrier() {
    compiler_fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn nested_disable_restore_is_idempotent() {
        let outer = disable_interrupts();
        let inner = disable_interrupts();
        assert!(!inner, "nested disable must report already-disabled");
        restore_interrupts(inner);
        assert!(
            !interrupts_are_enabled(),
            "inner restore must not re-enable while outer section is active"
        );
        restore_interrupts(outer);
    }
}
