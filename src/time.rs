// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clocks and the types used to describe time.
//!
//! The scheduler doesn't care where time comes from. It's generic over any
//! [`Clock`], which is anything that can say what time it is now, and whose
//! instants can be compared and offset by a duration.
//!
//! # Types for describing time
//!
//! The clocks in this crate use two types:
//!
//! `TickTime` represents a specific point in time, measured as a number of
//! microseconds since the clock was started. It's a 64-bit count, which means
//! it overflows roughly every 292 thousand years. This lets us ignore overflow
//! in timestamps, making everything simpler. `TickTime` is analogous to
//! `std::time::Instant` from the Rust standard library.
//!
//! `Micros` represents a relative time interval in microseconds. It uses the
//! same representation as `TickTime`, so adding them together is cheap. It's
//! _signed_, because a task's interval may legitimately be zero or negative,
//! which marks it as a one-shot.
//!
//! `core::time::Duration` also implements [`Span`], so a clock of your own can
//! use it. You might not want to do so on a smaller CPU: `Duration` uses a
//! mixed-number-base format internally that means almost all operations
//! require a 64-bit multiply or divide.
//!
//! # Clocks provided
//!
//! - [`ManualClock`] only moves when you tell it to. It's what the test suite
//!   uses, and it's handy for simulating a system on a host machine.
//! - `systick::SysTickClock` (Cortex-M only, `systick` feature) counts CPU
//!   cycles using the SysTick timer.

use core::cell::Cell;
use core::ops::{Add, AddAssign, Sub, SubAssign};
use core::time::Duration;

#[cfg(all(feature = "systick", not(cooprt_sim_irq)))]
pub mod systick;

/// A length of time usable with a [`Clock`].
pub trait Span: Copy + Ord {
    /// No time at all.
    const ZERO: Self;

    /// Makes a span of `ms` milliseconds.
    fn from_millis(ms: u32) -> Self;
}

/// A monotonic time source.
///
/// `now` must never go backwards.
pub trait Clock {
    /// A point in time.
    type Instant: Copy
        + Ord
        + Add<Self::Duration, Output = Self::Instant>
        + Sub<Output = Self::Duration>;

    /// The difference between two instants.
    type Duration: Span;

    /// Reads the clock.
    fn now(&self) -> Self::Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    type Instant = C::Instant;
    type Duration = C::Duration;

    fn now(&self) -> Self::Instant {
        C::now(self)
    }
}

impl Span for Duration {
    const ZERO: Self = Duration::ZERO;

    fn from_millis(ms: u32) -> Self {
        Duration::from_millis(u64::from(ms))
    }
}

/// Represents a moment in time as microseconds since the clock started.
/// Analog of `std::time::Instant`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TickTime(i64);

impl TickTime {
    /// Constructs a `TickTime` value describing a certain number of
    /// microseconds since the clock started.
    pub const fn from_micros_since_boot(us: i64) -> Self {
        Self(us)
    }

    /// Constructs a `TickTime` value describing a certain number of
    /// milliseconds since the clock started.
    pub const fn from_millis_since_boot(ms: u32) -> Self {
        Self(ms as i64 * 1000)
    }

    /// Microseconds since the clock started.
    pub const fn micros_since_boot(self) -> i64 {
        self.0
    }

    /// Subtracts an earlier time from this time, giving the amount of time
    /// between them. This is negative if `earlier` is actually later.
    pub fn micros_since(self, earlier: TickTime) -> Micros {
        Micros(self.0 - earlier.0)
    }

    /// Adds an interval to `self`, checking for overflow.
    pub fn checked_add(self, d: Micros) -> Option<Self> {
        self.0.checked_add(d.0).map(TickTime)
    }
}

/// Adds a number of microseconds to a `TickTime` with normal `+` overflow
/// behavior (i.e. checked in debug builds, optionally not checked in release
/// builds).
impl Add<Micros> for TickTime {
    type Output = Self;
    fn add(self, other: Micros) -> Self::Output {
        TickTime(self.0 + other.0)
    }
}

impl AddAssign<Micros> for TickTime {
    fn add_assign(&mut self, other: Micros) {
        self.0 += other.0;
    }
}

impl Sub<Micros> for TickTime {
    type Output = Self;
    fn sub(self, other: Micros) -> Self::Output {
        TickTime(self.0 - other.0)
    }
}

impl Sub for TickTime {
    type Output = Micros;
    fn sub(self, other: Self) -> Micros {
        self.micros_since(other)
    }
}

impl From<TickTime> for i64 {
    fn from(t: TickTime) -> Self {
        t.0
    }
}

/// A period of time measured in microseconds.
///
/// This plays a role similar to `core::time::Duration` but is designed to be
/// cheaper to use, and it can be negative. Since microseconds are the unit of
/// [`TickTime`], a `Micros` can be used for any deadline computation without
/// any unit conversions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Micros(pub i64);

impl Micros {
    /// Makes an interval of `ms` milliseconds.
    pub const fn from_millis(ms: u32) -> Self {
        Self(ms as i64 * 1000)
    }

    /// Makes an interval of `s` seconds.
    pub const fn from_secs(s: u32) -> Self {
        Self(s as i64 * 1_000_000)
    }

    /// Whole milliseconds in this interval, rounded toward zero.
    pub const fn as_millis(self) -> i64 {
        self.0 / 1000
    }
}

impl Span for Micros {
    const ZERO: Self = Micros(0);

    fn from_millis(ms: u32) -> Self {
        Micros::from_millis(ms)
    }
}

impl Add for Micros {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Micros(self.0 + other.0)
    }
}

impl AddAssign for Micros {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Micros {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Micros(self.0 - other.0)
    }
}

impl SubAssign for Micros {
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl From<Micros> for i64 {
    fn from(x: Micros) -> Self {
        x.0
    }
}

impl From<i64> for Micros {
    fn from(x: i64) -> Self {
        Self(x)
    }
}

/// A clock that only moves when told to.
///
/// This is `!Sync` and meant to be owned by whatever it's driving (a
/// [`Scheduler`][crate::exec::Scheduler], usually), and advanced through a
/// shared reference from the outside.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<TickTime>,
}

impl ManualClock {
    /// Creates a clock reading zero.
    pub const fn new() -> Self {
        Self::starting_at(TickTime(0))
    }

    /// Creates a clock reading `t`.
    pub const fn starting_at(t: TickTime) -> Self {
        Self { now: Cell::new(t) }
    }

    /// Sets the clock to `t`.
    ///
    /// # Panics
    ///
    /// If `t` is earlier than the current reading; clocks don't go backwards.
    pub fn set(&self, t: TickTime) {
        crate::cheap_assert!(t >= self.now.get());
        self.now.set(t);
    }

    /// Moves the clock forward by `d`, returning the new reading.
    ///
    /// # Panics
    ///
    /// If `d` is negative.
    pub fn advance(&self, d: Micros) -> TickTime {
        crate::cheap_assert!(d >= Micros::ZERO);
        let t = self.now.get() + d;
        self.now.set(t);
        t
    }
}

impl Clock for ManualClock {
    type Instant = TickTime;
    type Duration = Micros;

    fn now(&self) -> TickTime {
        self.now.get()
    }
}

/// Converts CPU cycle counts to microseconds.
///
/// If the CPU runs at a power-of-two number of MHz (1, 2, 4, 8, 16, 32, ...
/// MHz) this is a shift; otherwise it's a 64-bit division, which is _much_
/// slower on parts without a divider. If you can choose your clock, choose one
/// of those.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct CycleScale {
    cpu_hz: u32,
    shift: Option<u32>,
}

impl CycleScale {
    /// Works out the conversion for a CPU running at `cpu_hz`.
    ///
    /// # Panics
    ///
    /// If `cpu_hz` is below 1 kHz.
    pub const fn new(cpu_hz: u32) -> Self {
        if cpu_hz < 1000 {
            panic!();
        }
        let mhz = cpu_hz / 1_000_000;
        let shift = if cpu_hz % 1_000_000 == 0 && mhz.is_power_of_two() {
            Some(mhz.trailing_zeros())
        } else {
            None
        };
        Self { cpu_hz, shift }
    }

    /// The CPU frequency this was made for.
    pub const fn cpu_hz(&self) -> u32 {
        self.cpu_hz
    }

    /// Checks whether conversion is a shift rather than a division.
    pub const fn is_shift(&self) -> bool {
        self.shift.is_some()
    }

    /// Number of CPU cycles in one millisecond.
    pub const fn cycles_per_milli(&self) -> u32 {
        self.cpu_hz / 1000
    }

    /// Converts `cycles` to microseconds, rounding down.
    pub const fn to_micros(&self, cycles: i64) -> i64 {
        match self.shift {
            Some(s) => cycles >> s,
            None => cycles * 1_000_000 / self.cpu_hz as i64,
        }
    }
}
