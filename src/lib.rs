// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A tiny cooperative real-time core for single-core, interrupt-driven
//! microcontrollers.
//!
//! This provides the concurrency and scheduling nucleus you need to share a
//! small processor (think Cortex-M0+) between a handful of foreground jobs and
//! the interrupt handlers that feed them, without a preemptive kernel and
//! without a heap.
//!
//! # Design principles
//!
//! 1. Be compact. Everything here is sized at compile time. Tables, buffers,
//!    and registries are fixed-size and live wherever you put them.
//!
//! 2. Never block the processor. Operations that can't make progress right
//!    now return a value saying so (`None`, `false`, `Err(x)`), and the caller
//!    decides whether to retry, drop, or escalate. The usual answer is "return
//!    `false` from your task and let the scheduler call you again."
//!
//! 3. No singletons. The scheduler, buffers, arbiters and ISR registry are
//!    explicitly constructed objects that you pass around by reference. This
//!    keeps all of it testable on a host machine, where interrupt masking is
//!    simulated.
//!
//! # The pieces
//!
//! From the bottom up:
//!
//! - [`irq`] has [`InterruptLock`][irq::InterruptLock], a scoped critical
//!   section that restores (rather than blindly re-enables) the interrupt state
//!   it found, so it nests.
//!
//! - [`atomic`] has [`AtomicCell`][atomic::AtomicCell], an integer that can be
//!   shared with an ISR. Loads and stores that fit in one bus access are done
//!   directly; everything else takes a short critical section.
//!
//! - [`spsc`] has a single-producer, single-consumer byte [`Buffer`][spsc::Buffer]
//!   over borrowed storage. Only the byte count is shared between the two
//!   sides, so neither side disables interrupts on its hot path.
//!
//! - [`ownership`] lets many callers take turns at one device (say, a UART)
//!   without ever waiting for it: you get the device or you get told to come
//!   back later.
//!
//! - [`exec`] is the cooperative [`Scheduler`][exec::Scheduler]: a fixed table
//!   of periodic and one-shot callbacks, driven by any [`Clock`][time::Clock].
//!
//! - [`isr`] maps interrupt vectors to handler objects, so that drivers that
//!   aren't built from statics can still service their interrupts.
//!
//! # A typical main loop
//!
//! ```ignore
//! let mut sched: Scheduler<SysTickClock, Board, 16> = Scheduler::new(clock);
//! sched.insert(blink, Micros::from_millis(80)).ok();
//! sched.insert(report, Micros::from_millis(500)).ok();
//! cooprt::exec::run_tasks_wfi(&mut sched, &mut board)
//! ```
//!
//! Each task is a plain `fn(&mut Task<C, X>, &mut X) -> bool`. It gets its own
//! table entry (so it can adjust its interval or next run time) and the
//! application context. Returning `false` means "I couldn't finish, call me
//! again"; returning `true` means "done for now."

#![no_std]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

#[cfg(any(test, cooprt_sim_irq))]
#[macro_use]
extern crate std;

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only, so,
/// don't use this more than once on the same line. In exchange, this makes
/// asserts significantly smaller in terms of text size.
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}
pub(crate) use cheap_assert;

/// Internal trace logging. Forwards to `defmt` when the `defmt-03` feature is
/// on, and vanishes (arguments and all) when it's off.
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-03")]
        defmt::trace!($($arg)*);
    }
}
pub(crate) use trace;

pub mod irq;
pub mod atomic;
pub mod spsc;
pub mod ownership;
pub mod time;
pub mod exec;
pub mod isr;

use core::marker::PhantomData;

/// Zero-sized marker type that can be included to ensure that a data structure
/// is not automatically made `Sync` (i.e. safe for sharing across threads).
///
/// A type that includes this may still be inferred as `Send`.
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct NotSyncMarker(PhantomData<core::cell::Cell<()>>);

/// Zero-sized marker type that can be included to ensure that a data structure
/// is not automatically made `Send` (i.e. safe for transfer across threads).
///
/// This also blocks `Sync`.
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct NotSendMarker(PhantomData<*const ()>);
