// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing interrupts to driver objects.
//!
//! `cortex-m-rt` wants interrupt handlers to be free functions. That's fine for
//! drivers whose state lives in statics, but a driver that's an ordinary object
//! (a UART that owns its [`Producer`][crate::spsc::Producer] and
//! [`Consumer`][crate::spsc::Consumer], say) needs a way to get from "vector 44
//! fired" to "call `isr` on _this_ UART."
//!
//! [`IsrTable`] is that map. Drivers implement [`Isr`] (or you register a
//! closure), you [`register`][IsrTable::register] each one against its
//! [`Vector`] during setup, and the interrupt handler calls
//! [`dispatch`][IsrTable::dispatch] with the vector it was entered for. On
//! Cortex-M, [`dispatch_active`][IsrTable::dispatch_active] reads the active
//! vector from the SCB for you, so one handler can be shared among all the
//! vectors routed through the table.
//!
//! Because dispatch is just a method call, tests can drive a driver's
//! interrupt path by calling `dispatch` directly, without any hardware.

use core::fmt;

/// An interrupt handler.
pub trait Isr {
    /// Services the interrupt.
    fn isr(&mut self);
}

impl<F: FnMut()> Isr for F {
    fn isr(&mut self) {
        self()
    }
}

/// A Cortex-M exception or interrupt number, as it appears in the vector
/// table: exceptions are 1 through 15, and external interrupt `n` is `16 + n`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Vector(u16);

impl Vector {
    /// The HardFault exception.
    pub const HARD_FAULT: Self = Self(3);
    /// The SVCall exception.
    pub const SV_CALL: Self = Self(11);
    /// The PendSV exception.
    pub const PEND_SV: Self = Self(14);
    /// The SysTick exception.
    pub const SYS_TICK: Self = Self(15);

    /// Vector for external interrupt (IRQ) number `n`.
    pub const fn irq(n: u16) -> Self {
        Self(16 + n)
    }

    /// Vector for system exception number `n`.
    ///
    /// # Panics
    ///
    /// If `n` isn't in `1..16`.
    pub const fn exception(n: u8) -> Self {
        if n == 0 || n >= 16 {
            panic!();
        }
        Self(n as u16)
    }

    /// Position in the vector table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// External interrupt number, or `None` for a system exception.
    pub const fn irq_number(self) -> Option<u16> {
        if self.0 >= 16 {
            Some(self.0 - 16)
        } else {
            None
        }
    }
}

/// Maps up to `N` vectors to handlers. See the module docs.
pub struct IsrTable<'a, const N: usize> {
    slots: [Option<&'a mut dyn Isr>; N],
    spurious: u32,
}

impl<'a, const N: usize> IsrTable<'a, N> {
    /// Creates a table with no handlers.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            spurious: 0,
        }
    }

    /// Routes `vector` to `handler`.
    ///
    /// If the vector is already taken, or is beyond the end of the table, the
    /// handler is given back in the `Err`.
    pub fn register(
        &mut self,
        vector: Vector,
        handler: &'a mut dyn Isr,
    ) -> Result<(), &'a mut dyn Isr> {
        match self.slots.get_mut(vector.index()) {
            Some(slot @ None) => {
                *slot = Some(handler);
                Ok(())
            }
            _ => Err(handler),
        }
    }

    /// Removes the handler for `vector`, returning it.
    pub fn unregister(&mut self, vector: Vector) -> Option<&'a mut dyn Isr> {
        self.slots.get_mut(vector.index())?.take()
    }

    /// Checks whether `vector` has a handler.
    pub fn is_registered(&self, vector: Vector) -> bool {
        matches!(self.slots.get(vector.index()), Some(Some(_)))
    }

    /// Calls the handler for `vector`. Returns `false` if there isn't one,
    /// which is counted as a spurious interrupt.
    pub fn dispatch(&mut self, vector: Vector) -> bool {
        match self.slots.get_mut(vector.index()) {
            Some(Some(handler)) => {
                handler.isr();
                true
            }
            _ => {
                self.spurious = self.spurious.wrapping_add(1);
                crate::trace!("isr: spurious vector {}", vector.index());
                false
            }
        }
    }

    /// Calls the handler for whichever vector the processor is currently
    /// servicing. Meant to be called from an interrupt handler.
    #[cfg(not(cooprt_sim_irq))]
    pub fn dispatch_active(&mut self) -> bool {
        // Safety: ICSR is read-only for our purposes, and reading it has no
        // side effects.
        let icsr = unsafe { (*cortex_m::peripheral::SCB::PTR).icsr.read() };
        // VECTACTIVE is ICSR[8:0].
        self.dispatch(Vector((icsr & 0x1FF) as u16))
    }

    /// Number of dispatches that found no handler.
    pub fn spurious(&self) -> u32 {
        self.spurious
    }
}

impl<const N: usize> Default for IsrTable<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for IsrTable<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut l = f.debug_list();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_some() {
                l.entry(&i);
            }
        }
        l.finish()
    }
}
