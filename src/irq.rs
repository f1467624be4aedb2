// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt masking: the critical section everything else is built on.
//!
//! An [`InterruptLock`] records whether interrupts were enabled when it was
//! created, disables them, and puts things back the way it found them when
//! it's dropped. Because it *restores* rather than unconditionally
//! re-enabling, locks nest properly:
//!
//! ```ignore
//! let outer = InterruptLock::new();   // interrupts were on; now off
//! {
//!     let inner = InterruptLock::new(); // already off; stays off
//! }                                     // inner drop: still off
//! drop(outer);                          // outer drop: back on
//! ```
//!
//! Every moment spent inside a lock is a moment no interrupt can be serviced
//! -- including the timer tick that drives the scheduler's clock. Keep them
//! short.
//!
//! # Backends
//!
//! On Cortex-M this reads and writes PRIMASK. On hosted targets (which
//! `build.rs` flags with `cooprt_sim_irq`) there are no interrupts to mask, so
//! the mask is simulated; this is what the test suite runs against. Each
//! thread has its own mask, and masking it takes the process-wide lock from
//! the `critical-section` crate's `std` implementation. A thread that's
//! masked therefore excludes every other thread's critical sections, the way
//! masked interrupts exclude ISRs on the real thing, and `are_enabled` in one
//! thread never reports another thread's lock.

use crate::NotSendMarker;

cfg_if::cfg_if! {
    if #[cfg(cooprt_sim_irq)] {
        mod backend {
            use core::cell::Cell;

            use critical_section::RestoreState;

            thread_local! {
                static MASKED: Cell<bool> = const { Cell::new(false) };
                static HELD: Cell<Option<RestoreState>> = const { Cell::new(None) };
            }

            pub(super) fn enabled() -> bool {
                !MASKED.with(|m| m.get())
            }

            pub(super) fn disable() {
                if enabled() {
                    // Safety: the matching release happens in `enable`, on
                    // this thread, since the mask is per-thread.
                    let rs = unsafe { critical_section::acquire() };
                    HELD.with(|h| h.set(Some(rs)));
                    MASKED.with(|m| m.set(true));
                }
            }

            pub(super) fn enable() {
                if !enabled() {
                    MASKED.with(|m| m.set(false));
                    if let Some(rs) = HELD.with(|h| h.take()) {
                        // Safety: `rs` came from the `acquire` in `disable`,
                        // and is released exactly once.
                        unsafe { critical_section::release(rs) }
                    }
                }
            }
        }
    } else {
        mod backend {
            use core::sync::atomic::{compiler_fence, Ordering};

            pub(super) fn enabled() -> bool {
                cortex_m::register::primask::read().is_inactive()
            }

            pub(super) fn disable() {
                cortex_m::interrupt::disable();
                compiler_fence(Ordering::SeqCst);
            }

            pub(super) fn enable() {
                compiler_fence(Ordering::SeqCst);
                // Safety: we only get here when restoring a state in which
                // interrupts were already enabled, so no critical section that
                // was relying on them being off is still running.
                unsafe {
                    cortex_m::interrupt::enable();
                }
            }
        }
    }
}

/// Checks whether interrupts are currently enabled.
#[inline]
pub fn are_enabled() -> bool {
    backend::enabled()
}

/// A scoped critical section. See the module docs.
///
/// This is deliberately neither `Copy`, `Clone`, nor `Send`: each lock
/// belongs to exactly one stack frame, and must be dropped in the reverse
/// order it was created.
#[derive(Debug)]
#[must_use = "interrupts are restored as soon as the lock is dropped"]
pub struct InterruptLock {
    was_enabled: bool,
    _marker: NotSendMarker,
}

impl InterruptLock {
    /// Records the current interrupt state and disables interrupts.
    #[inline]
    pub fn new() -> Self {
        let lock = Self::record();
        backend::disable();
        lock
    }

    /// Records the current interrupt state *without* changing it.
    ///
    /// When dropped, this still restores the recorded state. This is useful in
    /// code that may toggle interrupts itself and wants a guaranteed way back.
    #[inline]
    pub fn record() -> Self {
        InterruptLock {
            was_enabled: backend::enabled(),
            _marker: NotSendMarker::default(),
        }
    }

    /// Were interrupts enabled when this lock was created?
    #[inline]
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }

    /// Were interrupts already disabled when this lock was created?
    #[inline]
    pub fn was_disabled(&self) -> bool {
        !self.was_enabled
    }
}

impl Default for InterruptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptLock {
    #[inline]
    fn drop(&mut self) {
        if self.was_enabled {
            backend::enable();
        } else {
            backend::disable();
        }
    }
}

/// Runs `body` with interrupts disabled, restoring the previous state after.
///
/// The lock is passed to `body` so it can be handed to operations that want
/// proof one is held, like
/// [`AtomicCell::store_locked`][crate::atomic::AtomicCell::store_locked].
#[inline]
pub fn free<R>(body: impl FnOnce(&InterruptLock) -> R) -> R {
    let lock = InterruptLock::new();
    body(&lock)
}
