// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A cooperative scheduler for time-triggered work.
//!
//! # Tasks
//!
//! A task is a plain function:
//!
//! ```ignore
//! fn blink(task: &mut Task<SysTickClock, Board>, board: &mut Board) -> bool
//! ```
//!
//! It receives its own [`Task`] entry, so it can look at or change its
//! schedule, and the application context `X`, which is whatever you pass to
//! [`Scheduler::run_due`]. Its return value says whether it got its work done:
//!
//! - `false` means "I couldn't make progress, call me again." The task's
//!   `run_at` is left alone, so it's still due and will be called again on the
//!   next pass. This is how a task waits for a device or for buffer space
//!   without stalling anyone else.
//!
//! - `true` means "done." What happens next depends on the task's `interval`:
//!
//!   - If the interval is positive, the task is periodic, and is rearmed for
//!     `interval` after the time it was _due_ (not the time it actually ran).
//!     A task due at 100 ms with a 50 ms interval that doesn't get to run until
//!     103 ms is next due at 150 ms, so periodic tasks don't drift. (This
//!     replaces whatever the task put in `run_at`.)
//!
//!   - If the interval is zero or negative, the task is a one-shot. It's
//!     removed from the table _unless_ it moved its own `run_at` past the time
//!     at which the scheduler picked it up. So a one-shot can keep itself alive
//!     for another round by setting `run_at` into the future, and it can turn
//!     itself periodic (or back) by changing `interval`.
//!
//! Tasks always run to completion, one at a time, in table order. There's no
//! priority among tasks; ISRs are where priority lives.
//!
//! # Task identity
//!
//! A task is identified by its function. Inserting a function that's already
//! in the table replaces the existing entry, so there's at most one entry per
//! function, and [`Scheduler::remove`] and friends take the function to find
//! it.
//!
//! # The main loop
//!
//! [`Scheduler::run_due`] runs everything that's due and tells you when the
//! next thing will be, so the processor can sleep until then.
//! [`run_tasks`] wraps that up into a loop, and on Cortex-M,
//! [`run_tasks_wfi`] does so with the CPU sleeping between interrupts.

use core::fmt;

use crate::time::{Clock, Span};

/// Furthest into the future `run_due` will report the next deadline, in
/// milliseconds. This is what you get back from an empty table.
pub const IDLE_HORIZON_MS: u32 = 24 * 60 * 60 * 1000;

/// Signature of a task function. See the module docs.
pub type TaskFn<C, X> = fn(&mut Task<C, X>, &mut X) -> bool;

/// An entry in the task table.
pub struct Task<C: Clock, X> {
    /// When the task is next due. A task may move this itself.
    pub run_at: C::Instant,
    /// Time between runs if positive; zero or negative for a one-shot. A task
    /// may change this itself.
    pub interval: C::Duration,
    /// The function this entry runs. A task may replace this itself, to move
    /// on to the next step of a sequence, say. The entry is then identified by
    /// the new function.
    pub func: TaskFn<C, X>,
}

impl<C: Clock, X> Task<C, X> {
    /// Checks whether this task rearms itself after completing.
    pub fn is_periodic(&self) -> bool {
        self.interval > C::Duration::ZERO
    }

    fn is(&self, func: TaskFn<C, X>) -> bool {
        core::ptr::fn_addr_eq(self.func, func)
    }
}

impl<C: Clock, X> Clone for Task<C, X> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Clock, X> Copy for Task<C, X> {}

impl<C: Clock, X> fmt::Debug for Task<C, X>
where
    C::Instant: fmt::Debug,
    C::Duration: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("run_at", &self.run_at)
            .field("interval", &self.interval)
            .field("func", &(self.func as *const ()))
            .finish()
    }
}

/// Error produced when the task table has no free slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TableFull;

/// A fixed-size table of up to `N` tasks, driven by the clock `C`, operating on
/// an application context `X`. See the module docs.
pub struct Scheduler<C: Clock, X, const N: usize> {
    clock: C,
    tasks: [Option<Task<C, X>>; N],
}

impl<C: Clock, X, const N: usize> Scheduler<C, X, N> {
    /// Creates an empty scheduler that reads time from `clock`.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            tasks: core::array::from_fn(|_| None),
        }
    }

    /// The clock this scheduler runs on.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Adds `func` to the table, first due `interval` from now, repeating every
    /// `interval` if it's positive. If `func` was already in the table, the old
    /// entry is replaced.
    ///
    /// A zero or negative `interval` makes a one-shot that's due immediately.
    pub fn insert(
        &mut self,
        func: TaskFn<C, X>,
        interval: C::Duration,
    ) -> Result<(), TableFull> {
        let run_at = self.clock.now() + interval;
        self.place(Task { run_at, interval, func })
    }

    /// Adds `func` to the table as a one-shot due at `at`. If `func` was
    /// already in the table, the old entry is replaced.
    pub fn insert_at(
        &mut self,
        func: TaskFn<C, X>,
        at: C::Instant,
    ) -> Result<(), TableFull> {
        self.place(Task {
            run_at: at,
            interval: C::Duration::ZERO,
            func,
        })
    }

    fn place(&mut self, task: Task<C, X>) -> Result<(), TableFull> {
        self.remove(task.func);
        match self.tasks.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(task);
                Ok(())
            }
            None => {
                crate::trace!("exec: task table full ({} slots)", N);
                Err(TableFull)
            }
        }
    }

    fn slot_of(&self, func: TaskFn<C, X>) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| matches!(t, Some(t) if t.is(func)))
    }

    /// Takes `func` out of the table. Returns `true` if it was there.
    pub fn remove(&mut self, func: TaskFn<C, X>) -> bool {
        match self.slot_of(func) {
            Some(i) => {
                self.tasks[i] = None;
                true
            }
            None => false,
        }
    }

    /// Checks whether `func` is in the table.
    pub fn contains(&self, func: TaskFn<C, X>) -> bool {
        self.slot_of(func).is_some()
    }

    /// When `func` is next due, if it's in the table.
    pub fn next_run(&self, func: TaskFn<C, X>) -> Option<C::Instant> {
        let i = self.slot_of(func)?;
        self.tasks[i].as_ref().map(|t| t.run_at)
    }

    /// Number of tasks in the table.
    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_some()).count()
    }

    /// Checks whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.iter().all(Option::is_none)
    }

    /// Maximum number of tasks, `N`.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Runs `func` right now, whether or not it's due. Its return value is
    /// handled just as in [`Scheduler::run_due`].
    ///
    /// Returns `false` if `func` isn't in the table.
    pub fn run_one(&mut self, func: TaskFn<C, X>, cx: &mut X) -> bool {
        match self.slot_of(func) {
            Some(i) => self.run_slot(i, true, cx),
            None => false,
        }
    }

    /// Runs every task that's due, in table order, and returns the time at
    /// which the next one will be due.
    ///
    /// The return value is never more than [`IDLE_HORIZON_MS`] past now. It
    /// may be in the past, if a task asked to be retried.
    pub fn run_due(&mut self, cx: &mut X) -> C::Instant {
        for i in 0..N {
            self.run_slot(i, false, cx);
        }

        let horizon = self.clock.now() + C::Duration::from_millis(IDLE_HORIZON_MS);
        self.tasks
            .iter()
            .flatten()
            .map(|t| t.run_at)
            .fold(horizon, core::cmp::min)
    }

    /// Runs the task in slot `i` if it's due (or `force` is set), and applies
    /// the rearm rules. Returns `true` if the task ran.
    fn run_slot(&mut self, i: usize, force: bool, cx: &mut X) -> bool {
        let now = self.clock.now();
        let Some(task) = self.tasks[i].as_mut() else {
            return false;
        };
        if !force && task.run_at > now {
            return false;
        }
        // When it was supposed to run. Only a forced early run makes this
        // differ from `run_at`.
        let due = core::cmp::min(task.run_at, now);

        let func = task.func;
        if !func(task, cx) {
            return true;
        }

        if task.interval > C::Duration::ZERO {
            task.run_at = due + task.interval;
        } else if task.run_at <= now {
            crate::trace!("exec: one-shot finished in slot {}", i);
            self.tasks[i] = None;
        }
        true
    }

    /// Calls `idle_hook` repeatedly until the clock reaches `deadline`.
    ///
    /// The hook is always called at least once, even if `deadline` has already
    /// passed. With a hook that sleeps until the next interrupt, this means a
    /// task that keeps asking to be retried is polled once per wakeup rather
    /// than in a tight loop.
    pub fn idle_until(&self, deadline: C::Instant, mut idle_hook: impl FnMut()) {
        loop {
            idle_hook();
            if self.clock.now() >= deadline {
                break;
            }
        }
    }
}

impl<C, X, const N: usize> fmt::Debug for Scheduler<C, X, N>
where
    C: Clock + fmt::Debug,
    C::Instant: fmt::Debug,
    C::Duration: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("clock", &self.clock)
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// Runs the scheduler forever, calling `idle_hook` between passes until the
/// next task is due.
///
/// If you'd like the processor to sleep when idle, call WFI from within
/// `idle_hook`, or use [`run_tasks_wfi`].
pub fn run_tasks<C: Clock, X, const N: usize>(
    sched: &mut Scheduler<C, X, N>,
    cx: &mut X,
    mut idle_hook: impl FnMut(),
) -> ! {
    loop {
        let next = sched.run_due(cx);
        sched.idle_until(next, &mut idle_hook);
    }
}

/// Runs the scheduler forever, sleeping with WFI between interrupts whenever
/// no task is due.
///
/// The interrupt that drives your clock (the SysTick, usually) is what wakes
/// the processor to notice that time has moved on, so it must be enabled.
#[cfg(not(cooprt_sim_irq))]
pub fn run_tasks_wfi<C: Clock, X, const N: usize>(
    sched: &mut Scheduler<C, X, N>,
    cx: &mut X,
) -> ! {
    run_tasks(sched, cx, || {
        cortex_m::asm::wfi();
        // This works around an undocumented erratum on STM32 processors when
        // WFI is set to go to "Sleep" level and a debug agent has set the
        // DBGMCU bits to keep clocks running during sleep: the pipeline state
        // after the WFI can be corrupted. An ISB appears to fix it. On other
        // Cortex processors this costs a few cycles.
        cortex_m::asm::isb();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{ManualClock, Micros, TickTime};
    use std::vec::Vec;

    #[derive(Debug, Default)]
    struct Log {
        ran: Vec<&'static str>,
        retry: bool,
    }

    type T = Task<ManualClock, Log>;
    type Sched<const N: usize> = Scheduler<ManualClock, Log, N>;

    fn ms(n: u32) -> Micros {
        Micros::from_millis(n)
    }

    fn at(n: u32) -> TickTime {
        TickTime::from_millis_since_boot(n)
    }

    fn a(_: &mut T, log: &mut Log) -> bool {
        log.ran.push("a");
        true
    }

    fn b(_: &mut T, log: &mut Log) -> bool {
        log.ran.push("b");
        true
    }

    fn c(_: &mut T, log: &mut Log) -> bool {
        log.ran.push("c");
        true
    }

    fn flaky(_: &mut T, log: &mut Log) -> bool {
        log.ran.push("flaky");
        !log.retry
    }

    /// One-shot that pushes its own deadline out once before finishing.
    fn snooze(task: &mut T, log: &mut Log) -> bool {
        log.ran.push("snooze");
        if log.ran.iter().filter(|&&s| s == "snooze").count() == 1 {
            task.run_at = task.run_at + ms(30);
        }
        true
    }

    #[test]
    fn due_tasks_run_in_table_order() {
        let mut s: Sched<4> = Scheduler::new(ManualClock::new());
        s.insert(c, ms(10)).unwrap();
        s.insert(a, ms(10)).unwrap();
        s.insert(b, ms(20)).unwrap();
        let mut log = Log::default();

        s.clock().set(at(10));
        assert_eq!(s.run_due(&mut log), at(20));
        assert_eq!(log.ran, ["c", "a"]);

        s.clock().set(at(20));
        s.run_due(&mut log);
        assert_eq!(log.ran, ["c", "a", "c", "a", "b"]);
    }

    #[test]
    fn periodic_rearm_is_drift_free() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::starting_at(at(50)));
        s.insert(a, ms(50)).unwrap();
        assert_eq!(s.next_run(a), Some(at(100)));
        let mut log = Log::default();

        s.clock().set(at(103));
        s.run_due(&mut log);
        assert_eq!(s.next_run(a), Some(at(150)));

        s.clock().set(at(151));
        s.run_due(&mut log);
        assert_eq!(s.next_run(a), Some(at(200)));
        assert_eq!(log.ran.len(), 2);
    }

    #[test]
    fn retry_leaves_deadline_alone() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert(flaky, ms(5)).unwrap();
        let mut log = Log { retry: true, ..Log::default() };

        s.clock().set(at(7));
        assert_eq!(s.run_due(&mut log), at(5));
        assert_eq!(s.next_run(flaky), Some(at(5)));

        s.clock().set(at(8));
        s.run_due(&mut log);
        assert_eq!(log.ran, ["flaky", "flaky"]);

        log.retry = false;
        s.run_due(&mut log);
        assert_eq!(s.next_run(flaky), Some(at(10)));
    }

    #[test]
    fn one_shot_is_removed_after_completion() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert(b, Micros::ZERO).unwrap();
        s.insert(c, Micros(-5)).unwrap();
        let mut log = Log::default();

        s.run_due(&mut log);
        assert_eq!(log.ran, ["b", "c"]);
        assert!(s.is_empty());
    }

    #[test]
    fn one_shot_that_reschedules_itself_survives() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert_at(snooze, at(10)).unwrap();
        let mut log = Log::default();

        s.clock().set(at(10));
        s.run_due(&mut log);
        assert_eq!(s.next_run(snooze), Some(at(40)));

        s.clock().set(at(40));
        s.run_due(&mut log);
        assert!(!s.contains(snooze));
        assert_eq!(log.ran, ["snooze", "snooze"]);
    }

    #[test]
    fn one_shot_deadline_at_now_is_removed() {
        // The context carries the time the task thinks it is.
        fn until(task: &mut Task<ManualClock, TickTime>, now: &mut TickTime) -> bool {
            task.run_at = *now;
            true
        }

        let mut s: Scheduler<ManualClock, TickTime, 1> =
            Scheduler::new(ManualClock::starting_at(at(10)));
        s.insert_at(until, at(5)).unwrap();
        s.run_due(&mut at(10));
        assert!(s.is_empty());

        // One tick later is in the future, so that one stays.
        s.insert_at(until, at(5)).unwrap();
        s.run_due(&mut at(11));
        assert_eq!(s.next_run(until), Some(at(11)));
    }

    /// Does one run as `first`, then turns into `a`.
    fn first(task: &mut T, log: &mut Log) -> bool {
        log.ran.push("first");
        task.func = a;
        true
    }

    #[test]
    fn task_can_replace_its_function() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert(first, ms(10)).unwrap();
        let mut log = Log::default();

        s.clock().set(at(10));
        s.run_due(&mut log);
        assert!(!s.contains(first));
        assert_eq!(s.next_run(a), Some(at(20)));

        s.clock().set(at(20));
        s.run_due(&mut log);
        assert_eq!(log.ran, ["first", "a"]);
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut s: Sched<3> = Scheduler::new(ManualClock::new());
        s.insert(a, ms(10)).unwrap();
        s.insert(b, ms(10)).unwrap();
        s.insert(a, ms(99)).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.next_run(a), Some(at(99)));
    }

    #[test]
    fn full_table_is_reported() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert(a, ms(1)).unwrap();
        s.insert(b, ms(1)).unwrap();
        assert_eq!(s.insert(c, ms(1)), Err(TableFull));
        // Replacing doesn't need a free slot.
        assert_eq!(s.insert(b, ms(2)), Ok(()));
        assert_eq!(s.capacity(), 2);

        assert!(s.remove(a));
        assert!(!s.remove(a));
        assert_eq!(s.insert(c, ms(1)), Ok(()));
    }

    #[test]
    fn run_one_forces_an_early_run() {
        let mut s: Sched<2> = Scheduler::new(ManualClock::new());
        s.insert(a, ms(100)).unwrap();
        let mut log = Log::default();

        s.clock().set(at(30));
        assert!(s.run_one(a, &mut log));
        assert_eq!(log.ran, ["a"]);
        // Rearmed from when it ran, since it wasn't due yet.
        assert_eq!(s.next_run(a), Some(at(130)));

        assert!(!s.run_one(b, &mut log));
    }

    #[test]
    fn empty_table_reports_horizon() {
        let mut s: Sched<1> = Scheduler::new(ManualClock::starting_at(at(5)));
        let mut log = Log::default();
        assert_eq!(
            s.run_due(&mut log),
            at(5) + Micros::from_millis(IDLE_HORIZON_MS),
        );
    }

    #[test]
    fn idle_until_calls_hook_at_least_once() {
        let s: Sched<1> = Scheduler::new(ManualClock::new());
        let mut calls = 0;
        s.idle_until(at(0), || calls += 1);
        assert_eq!(calls, 1);

        s.idle_until(at(3), || {
            calls += 1;
            s.clock().advance(ms(1));
        });
        assert_eq!(calls, 4);
        assert_eq!(s.clock().now(), at(3));
    }

    #[test]
    fn core_duration_clock_works() {
        use core::cell::Cell;
        use core::time::Duration;

        struct Uptime(Cell<Duration>);

        impl Clock for Uptime {
            type Instant = Duration;
            type Duration = Duration;
            fn now(&self) -> Duration {
                self.0.get()
            }
        }

        fn tick(task: &mut Task<Uptime, u32>, n: &mut u32) -> bool {
            *n += 1;
            task.interval = Duration::from_millis(7);
            true
        }

        let mut s: Scheduler<Uptime, u32, 1> = Scheduler::new(Uptime(Cell::new(Duration::ZERO)));
        s.insert(tick, Duration::ZERO).unwrap();
        let mut n = 0;
        assert_eq!(s.run_due(&mut n), Duration::from_millis(7));
        s.clock().0.set(Duration::from_millis(7));
        assert_eq!(s.run_due(&mut n), Duration::from_millis(14));
        assert_eq!(n, 2);
    }
}
