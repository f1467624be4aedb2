// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integers that can be shared with interrupt handlers.
//!
//! ARMv6-M processors like the Cortex-M0+ don't have atomic read-modify-write
//! instructions, and can't load or store anything wider than a word in one
//! bus access. [`AtomicCell`] papers over both:
//!
//! - A load or store of a type no wider than `usize` is a single bus access,
//!   so it's done directly, with no critical section.
//! - A load or store of anything wider (e.g. a `u64` cycle counter) is wrapped
//!   in an [`InterruptLock`].
//! - Every compound operation (`add`, `or`, `set_bitmask`, ...) is wrapped in
//!   an [`InterruptLock`], because there's no other way to make it indivisible
//!   on these parts.
//!
//! The choice is made at compile time from the width of `T`
//! ([`CellValue::SINGLE_ACCESS`]); there's no runtime branch in the generated
//! code. On hosted targets, where the "interrupts" are other threads, every
//! access takes the lock.
//!
//! Compound operations return the *new* value, which is usually what you want
//! when you're, say, maintaining a high-water mark next to a counter.
//!
//! # Hardware registers
//!
//! `set_bitmask` is the tool for read-modify-write of a control register
//! that's also touched from interrupt context: it clears one mask, sets
//! another, and no reader can see the value in between.

use core::cell::UnsafeCell;
use core::fmt;

use crate::irq::InterruptLock;

mod sealed {
    pub trait Sealed {}
}

/// Integer types that can live in an [`AtomicCell`].
///
/// This is sealed; it's implemented for the primitive integer types.
pub trait CellValue: Copy + Eq + sealed::Sealed {
    /// `true` if a value of this type can be loaded or stored in one bus
    /// access on this target.
    const SINGLE_ACCESS: bool = core::mem::size_of::<Self>() <= core::mem::size_of::<usize>();

    /// Zero.
    const ZERO: Self;

    #[doc(hidden)]
    fn wrapping_add(self, other: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_sub(self, other: Self) -> Self;
    #[doc(hidden)]
    fn bit_and(self, other: Self) -> Self;
    #[doc(hidden)]
    fn bit_or(self, other: Self) -> Self;
    #[doc(hidden)]
    fn bit_xor(self, other: Self) -> Self;
    #[doc(hidden)]
    fn bit_not(self) -> Self;
    #[doc(hidden)]
    fn one() -> Self;
}

macro_rules! impl_cell_value {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl CellValue for $t {
                const ZERO: Self = 0;

                #[inline(always)]
                fn wrapping_add(self, other: Self) -> Self {
                    <$t>::wrapping_add(self, other)
                }
                #[inline(always)]
                fn wrapping_sub(self, other: Self) -> Self {
                    <$t>::wrapping_sub(self, other)
                }
                #[inline(always)]
                fn bit_and(self, other: Self) -> Self { self & other }
                #[inline(always)]
                fn bit_or(self, other: Self) -> Self { self | other }
                #[inline(always)]
                fn bit_xor(self, other: Self) -> Self { self ^ other }
                #[inline(always)]
                fn bit_not(self) -> Self { !self }
                #[inline(always)]
                fn one() -> Self { 1 }
            }
        )*
    };
}

impl_cell_value!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// An integer shared between foreground code and interrupt handlers. See the
/// module docs for what "atomic" means here.
///
/// This is `Sync` because the processors this crate targets have one core:
/// the only concurrency is interrupts, and every access that could tear is
/// done with interrupts masked. On a host, where the simulated mask is a
/// process-wide lock, every access takes it.
pub struct AtomicCell<T> {
    value: UnsafeCell<T>,
}

// Safety: see type docs. Single core, and every access that isn't a single bus
// operation happens inside an InterruptLock. Hosted builds lock every access.
unsafe impl<T: CellValue + Send> Sync for AtomicCell<T> {}

impl<T: CellValue> AtomicCell<T> {
    // Host threads really are concurrent, so plain loads and stores need the
    // lock there too.
    const LOCK_FREE: bool = T::SINGLE_ACCESS && !cfg!(cooprt_sim_irq);

    /// Creates a cell holding `value`.
    pub const fn new(value: T) -> Self {
        Self { value: UnsafeCell::new(value) }
    }

    #[inline(always)]
    fn read(&self) -> T {
        // Safety: the pointer comes from our own UnsafeCell and is aligned and
        // initialized. Volatile so the compiler re-reads it every time; an ISR
        // may have changed it.
        unsafe { self.value.get().read_volatile() }
    }

    #[inline(always)]
    fn write(&self, v: T) {
        // Safety: as in `read`.
        unsafe { self.value.get().write_volatile(v) }
    }

    /// Reads the current value.
    #[inline]
    pub fn load(&self) -> T {
        if Self::LOCK_FREE {
            self.read()
        } else {
            let _lock = InterruptLock::new();
            self.read()
        }
    }

    /// Replaces the current value.
    #[inline]
    pub fn store(&self, v: T) {
        if Self::LOCK_FREE {
            self.write(v)
        } else {
            let _lock = InterruptLock::new();
            self.write(v)
        }
    }

    /// Reads the value when the caller already holds a lock, skipping the
    /// internal one.
    #[inline]
    pub fn load_locked(&self, _lock: &InterruptLock) -> T {
        self.read()
    }

    /// Writes the value when the caller already holds a lock, skipping the
    /// internal one. Used to reset several related fields in one critical
    /// section.
    #[inline]
    pub fn store_locked(&self, _lock: &InterruptLock, v: T) {
        self.write(v)
    }

    /// Applies `f` to the value with interrupts masked, stores the result, and
    /// returns it.
    ///
    /// `f` runs inside the critical section, so keep it trivial.
    #[inline]
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        let _lock = InterruptLock::new();
        let v = f(self.read());
        self.write(v);
        v
    }

    /// Adds `v` (wrapping), returning the new value.
    #[inline]
    pub fn add(&self, v: T) -> T {
        self.update(|x| x.wrapping_add(v))
    }

    /// Subtracts `v` (wrapping), returning the new value.
    #[inline]
    pub fn sub(&self, v: T) -> T {
        self.update(|x| x.wrapping_sub(v))
    }

    /// Adds one, returning the new value.
    #[inline]
    pub fn increment(&self) -> T {
        self.add(T::one())
    }

    /// Subtracts one, returning the new value.
    #[inline]
    pub fn decrement(&self) -> T {
        self.sub(T::one())
    }

    /// ORs in `v`, returning the new value.
    #[inline]
    pub fn or(&self, v: T) -> T {
        self.update(|x| x.bit_or(v))
    }

    /// ANDs in `v`, returning the new value.
    #[inline]
    pub fn and(&self, v: T) -> T {
        self.update(|x| x.bit_and(v))
    }

    /// XORs in `v`, returning the new value.
    #[inline]
    pub fn xor(&self, v: T) -> T {
        self.update(|x| x.bit_xor(v))
    }

    /// Clears the bits in `clear`, then sets the bits in `set`, as one
    /// indivisible step. Returns the new value.
    ///
    /// For example, to set a two-bit field at `[1:0]` to `0b10` without
    /// touching anything else:
    ///
    /// ```ignore
    /// reg.set_bitmask(0b11, 0b10);
    /// ```
    ///
    /// Getting the masks right is the caller's job; bits in both masks end up
    /// set.
    #[inline]
    pub fn set_bitmask(&self, clear: T, set: T) -> T {
        self.update(|x| x.bit_and(clear.bit_not()).bit_or(set))
    }

    /// Gets the value through an exclusive reference, which needs no
    /// protection at all.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consumes the cell, returning the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: CellValue> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::ZERO)
    }
}

impl<T: CellValue + fmt::Debug> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.load()).finish()
    }
}
