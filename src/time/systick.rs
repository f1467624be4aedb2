// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timekeeping using the SysTick Timer.
//!
//! **Note:** this entire module is only available on Cortex-M targets with the
//! `systick` feature, which is the default.
//!
//! The SysTick interrupt fires once per millisecond and adds a millisecond's
//! worth of CPU cycles to a 64-bit running total. Reading the clock combines
//! that total with the timer's current down-count, so [`SysTickClock::now`]
//! has single-cycle resolution (reported in microseconds) even though the
//! interrupt is only 1 kHz.
//!
//! To use this, call [`SysTickClock::start`] once at startup and hand the
//! result to your [`Scheduler`][crate::exec::Scheduler].
//!
//! # Masked interrupts
//!
//! `now` is correct even when called with interrupts masked for up to one
//! tick: it notices a pending-but-unserviced SysTick and accounts for it
//! itself. Masking interrupts for longer than a tick loses time.

use cortex_m::peripheral::{syst::SystClkSource, SCB, SYST};
use cortex_m_rt::exception;

use portable_atomic::{AtomicU32, Ordering};

use crate::atomic::AtomicCell;
use crate::irq;
use crate::time::{Clock, CycleScale, Micros, TickTime};

/// CPU cycles accounted for by serviced SysTick interrupts. Updated by ISR.
static CYCLES: AtomicCell<u64> = AtomicCell::new(0);
/// CPU cycles per SysTick interrupt. Written once by `start`.
static CYCLES_PER_IRQ: AtomicU32 = AtomicU32::new(0);
/// Set by the ISR, cleared by `was_irq`.
static WAS_IRQ: AtomicCell<u8> = AtomicCell::new(0);

/// Delays longer than this idle the CPU between checks.
const DELAY_IDLE_THRESHOLD: Micros = Micros::from_millis(10);

/// A [`Clock`] driven by the Cortex-M SysTick timer.
#[derive(Copy, Clone, Debug)]
pub struct SysTickClock {
    scale: CycleScale,
}

impl SysTickClock {
    /// Sets up the SysTick timer for 1 kHz interrupts, assuming a CPU core
    /// clock of `cpu_hz`, and starts it.
    ///
    /// Call this once, before you need the time.
    pub fn start(syst: &mut SYST, cpu_hz: u32) -> Self {
        let scale = CycleScale::new(cpu_hz);
        let per_irq = scale.cycles_per_milli();

        syst.disable_counter();
        syst.disable_interrupt();
        CYCLES_PER_IRQ.store(per_irq, Ordering::Relaxed);
        CYCLES.store(0);
        WAS_IRQ.store(0);

        syst.set_reload(per_irq - 1);
        syst.clear_current();
        syst.set_clock_source(SystClkSource::Core);
        syst.enable_interrupt();
        syst.enable_counter();

        Self { scale }
    }

    /// CPU cycles since `start`.
    fn cycles() -> u64 {
        let per_irq = CYCLES_PER_IRQ.load(Ordering::Relaxed);
        irq::free(|lock| {
            let mut count = SYST::get_current();
            // Interrupts are off, so this can't change under us.
            let mut total = CYCLES.load_locked(lock);
            if SCB::is_pendst_pending() {
                // The counter wrapped since the ISR last ran. Read it again in
                // case it wrapped between the first read and the pending
                // check, and count the missing tick ourselves. The pending bit
                // stays set so the ISR still runs when we're done.
                count = SYST::get_current();
                total += u64::from(per_irq);
            }
            // The counter counts down from per_irq - 1.
            total + u64::from(per_irq - 1 - count)
        })
    }

    /// Reads and clears the "a SysTick interrupt happened" flag.
    ///
    /// An idle loop that wakes on any interrupt can use this to tell whether
    /// time has moved on, or whether it was woken by something else.
    pub fn was_irq(&self) -> bool {
        irq::free(|lock| {
            let was = WAS_IRQ.load_locked(lock) != 0;
            WAS_IRQ.store_locked(lock, 0);
            was
        })
    }

    /// Spins until `d` has elapsed.
    ///
    /// For delays over 10 ms, the CPU idles between SysTick interrupts rather
    /// than spinning, which makes the delay up to a tick longer than asked.
    ///
    /// This will never return if called with interrupts masked and `d` is
    /// longer than a tick.
    pub fn delay(&self, d: Micros) {
        let start = self.now();
        let idle = d > DELAY_IDLE_THRESHOLD;
        while self.now() - start < d {
            if idle {
                cortex_m::asm::wfi();
            }
        }
    }

    /// The cycle conversion in use.
    pub fn scale(&self) -> CycleScale {
        self.scale
    }
}

impl Clock for SysTickClock {
    type Instant = TickTime;
    type Duration = Micros;

    fn now(&self) -> TickTime {
        let us = self.scale.to_micros(Self::cycles() as i64);
        TickTime::from_micros_since_boot(us)
    }
}

/// System tick ISR. Advances the cycle total.
#[doc(hidden)]
#[exception]
fn SysTick() {
    CYCLES.add(u64::from(CYCLES_PER_IRQ.load(Ordering::Relaxed)));
    WAS_IRQ.store(1);
}
