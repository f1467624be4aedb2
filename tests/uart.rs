// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated UART shared by two tasks, with its transmit interrupt routed
//! through an ISR table. Exercises every layer together.

use cooprt::exec::{Scheduler, Task};
use cooprt::isr::{IsrTable, Vector};
use cooprt::ownership::{Holder, Ownable, Ownership};
use cooprt::spsc::{Buffer, Producer};
use cooprt::time::{ManualClock, Micros, Span};

const UART_TX: Vector = Vector::irq(27);
const GREETING: &[u8] = b"hello, world\r\n";

/// Foreground half of the driver: queues bytes for the ISR to send.
struct UartTx<'a, 's> {
    tx: Producer<'a, 's>,
}

impl UartTx<'_, '_> {
    fn print(&mut self, bytes: &[u8]) -> usize {
        self.tx.write_slice(bytes)
    }
}

impl Ownable for UartTx<'_, '_> {
    /// A new owner may change line settings, so wait for the old owner's
    /// bytes to go out.
    fn is_idle(&self) -> bool {
        self.tx.buffer().is_empty()
    }
}

struct Board<'a, 's> {
    uart: Ownership<UartTx<'a, 's>>,
    greeter: Holder,
    greeted: usize,
    dots: u32,
}

type Clk = ManualClock;

fn greet(_: &mut Task<Clk, Board<'_, '_>>, b: &mut Board<'_, '_>) -> bool {
    let Some(uart) = b.greeter.acquire(&mut b.uart) else {
        return false;
    };
    b.greeted += uart.print(&GREETING[b.greeted..]);
    if b.greeted < GREETING.len() {
        // Keep the UART; finish next time.
        return false;
    }
    b.greeter.release(&mut b.uart);
    true
}

fn dot(_: &mut Task<Clk, Board<'_, '_>>, b: &mut Board<'_, '_>) -> bool {
    match b.uart.try_perform(|u| u.print(b".")) {
        Some(1) => {
            b.dots += 1;
            true
        }
        _ => false,
    }
}

#[test]
fn tasks_share_uart_without_interleaving() {
    let mut storage = [0u8; 4];
    let mut buf = Buffer::new(&mut storage);
    let (tx, mut rx) = buf.split();
    let mut wire = Vec::new();

    let (dots, stats) = {
        // The line is slow: one byte per interrupt.
        let mut send_one = || {
            if let Some(byte) = rx.read() {
                wire.push(byte);
            }
        };
        let mut isrs: IsrTable<'_, 48> = IsrTable::new();
        assert!(isrs.register(UART_TX, &mut send_one).is_ok());

        let mut board = Board {
            uart: Ownership::new(UartTx { tx }),
            greeter: Holder::new(),
            greeted: 0,
            dots: 0,
        };
        let mut sched: Scheduler<Clk, Board<'_, '_>, 4> = Scheduler::new(ManualClock::new());
        sched.insert(greet, Micros::ZERO).unwrap();
        sched.insert(dot, Micros::from_millis(10)).unwrap();

        for _ in 0..60 {
            sched.run_due(&mut board);
            isrs.dispatch(UART_TX);
            sched.clock().advance(Micros::from_millis(1));
        }

        assert!(!sched.contains(greet));
        assert!(sched.contains(dot));
        assert!(!board.uart.is_owned());
        (board.dots, board.uart.stats())
    };

    assert_eq!(&wire[..GREETING.len()], GREETING);
    assert!(wire[GREETING.len()..].iter().all(|&c| c == b'.'));
    assert_eq!(wire.len(), GREETING.len() + dots as usize);
    assert!(dots >= 3);
    // The dot task came due while the greeting was still draining.
    assert!(stats.not_idle > 0);
    assert_eq!(stats.stale_closes, 0);
}

#[test]
fn producer_at_isr_priority_drains_buffer_itself() {
    // When the producer can't be preempted by the draining ISR, it has to do
    // the ISR's work to make room.
    let mut storage = [0u8; 2];
    let mut buf = Buffer::new(&mut storage);
    let (mut tx, mut rx) = buf.split();
    let mut wire = Vec::new();

    for &byte in GREETING {
        while !tx.write(byte) {
            if let Some(b) = rx.read() {
                wire.push(b);
            }
        }
    }
    while let Some(b) = rx.read() {
        wire.push(b);
    }
    assert_eq!(wire, GREETING);
    assert_eq!(buf.max_used(), 2);
}
