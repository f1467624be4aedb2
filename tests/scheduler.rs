// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler behavior against a hand-driven clock.

use cooprt::exec::{Scheduler, Task};
use cooprt::time::{Clock, ManualClock, Micros, Span, TickTime};

#[derive(Debug, Default)]
struct Cx {
    a_runs: u32,
    b_runs: u32,
    b_done: bool,
    phase: u32,
}

type T = Task<ManualClock, Cx>;

fn ms(n: u32) -> Micros {
    Micros::from_millis(n)
}

fn at(n: u32) -> TickTime {
    TickTime::from_millis_since_boot(n)
}

fn task_a(_: &mut T, cx: &mut Cx) -> bool {
    cx.a_runs += 1;
    true
}

fn task_b(_: &mut T, cx: &mut Cx) -> bool {
    cx.b_runs += 1;
    cx.b_done
}

#[test]
fn periodic_and_one_shot_together() {
    let mut sched: Scheduler<ManualClock, Cx, 16> = Scheduler::new(ManualClock::new());
    let mut cx = Cx { b_done: true, ..Cx::default() };

    sched.insert(task_a, ms(100)).unwrap();
    sched.insert(task_b, Micros::ZERO).unwrap();

    // At 0, only B is due. It finishes and goes away.
    let next = sched.run_due(&mut cx);
    assert_eq!((cx.a_runs, cx.b_runs), (0, 1));
    assert!(!sched.contains(task_b));
    assert_eq!(next, at(100));

    sched.clock().set(at(100));
    let next = sched.run_due(&mut cx);
    assert_eq!(cx.a_runs, 1);
    assert_eq!(sched.next_run(task_a), Some(at(200)));
    assert_eq!(next, at(200));
    assert_eq!(sched.len(), 1);
}

#[test]
fn one_shot_is_retried_until_it_finishes() {
    let mut sched: Scheduler<ManualClock, Cx, 4> = Scheduler::new(ManualClock::new());
    let mut cx = Cx::default();
    sched.insert(task_b, Micros::ZERO).unwrap();

    for _ in 0..3 {
        // Retrying tasks are still due, so the scheduler says "now."
        let next = sched.run_due(&mut cx);
        assert!(next <= sched.clock().now());
        sched.clock().advance(ms(1));
    }
    assert!(sched.contains(task_b));

    cx.b_done = true;
    sched.run_due(&mut cx);
    assert!(sched.is_empty());
    assert_eq!(cx.b_runs, 4);
}

#[test]
fn late_periodic_task_keeps_its_cadence() {
    let mut sched: Scheduler<ManualClock, Cx, 4> =
        Scheduler::new(ManualClock::starting_at(at(50)));
    let mut cx = Cx::default();
    sched.insert(task_a, ms(50)).unwrap();

    sched.clock().set(at(103));
    sched.run_due(&mut cx);
    assert_eq!(sched.next_run(task_a), Some(at(150)));

    sched.clock().set(at(150));
    sched.run_due(&mut cx);
    assert_eq!(sched.next_run(task_a), Some(at(200)));
}

/// Shows something once, holds on for a while, then goes away -- a one-shot
/// that turns itself periodic for one round and then back.
fn show_then_linger(task: &mut T, cx: &mut Cx) -> bool {
    cx.phase += 1;
    if task.interval == Micros::ZERO {
        task.interval = Micros::from_secs(5);
    } else {
        task.interval = Micros::ZERO;
    }
    true
}

#[test]
fn one_shot_can_linger_by_changing_its_interval() {
    let mut sched: Scheduler<ManualClock, Cx, 4> = Scheduler::new(ManualClock::new());
    let mut cx = Cx::default();
    sched.insert(show_then_linger, Micros::ZERO).unwrap();

    sched.run_due(&mut cx);
    assert_eq!(cx.phase, 1);
    assert_eq!(sched.next_run(show_then_linger), Some(at(5000)));

    sched.clock().set(at(4999));
    sched.run_due(&mut cx);
    assert_eq!(cx.phase, 1);

    sched.clock().set(at(5000));
    sched.run_due(&mut cx);
    assert_eq!(cx.phase, 2);
    assert!(!sched.contains(show_then_linger));
}

#[test]
fn run_tasks_style_loop_sleeps_until_next_deadline() {
    let mut sched: Scheduler<ManualClock, Cx, 4> = Scheduler::new(ManualClock::new());
    let mut cx = Cx::default();
    sched.insert(task_a, ms(10)).unwrap();

    let mut wakeups = 0;
    for _ in 0..5 {
        let next = sched.run_due(&mut cx);
        sched.idle_until(next, || {
            wakeups += 1;
            sched.clock().advance(ms(1));
        });
    }
    // Five passes, each waking every millisecond until the next 10 ms
    // deadline.
    assert_eq!(cx.a_runs, 4);
    assert_eq!(wakeups, 50);
    assert_eq!(sched.clock().now(), at(50));
}
