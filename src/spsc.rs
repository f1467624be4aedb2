// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A byte buffer for moving data between foreground code and an ISR.
//!
//! This is a "single-producer, single-consumer" circular buffer that splits
//! into separate [`Producer`] and [`Consumer`] endpoints -- at any given time,
//! there is at most one of each alive in your program, ensuring that writes
//! and reads are not coming from multiple directions.
//!
//! You create a buffer by calling [`Buffer::new`] and passing it a reference
//! to its backing storage; the buffer never allocates, and its capacity is the
//! length of that storage. To move data through it, call [`Buffer::split`] to
//! get the two endpoints, and hand them to the code paths that need them --
//! typically a foreground task writes, and a UART transmit ISR reads.
//!
//! # Implementation
//!
//! The write index belongs to the producer and the read index belongs to the
//! consumer; neither side ever writes the other's. The only field both sides
//! modify is the byte count, which lives in an
//! [`AtomicCell`][crate::atomic::AtomicCell]. So:
//!
//! 1. Neither side disables interrupts to move a byte, except for the few
//!    cycles the count update takes on parts without atomic read-modify-write.
//! 2. Unlike a Lamport queue, all `N` bytes of storage are usable.
//!
//! The producer stores the byte *before* bumping the count, and the consumer
//! takes the byte *before* dropping it, so whichever side sees the count first
//! always finds the data (or the free slot) it expects.
//!
//! # Servicing your own interrupt
//!
//! If the producer is running at or above the priority of the ISR that drains
//! the buffer, that ISR can't preempt it, and a full buffer will stay full.
//! Drivers that can find themselves in that position have to notice it and do
//! the ISR's draining work themselves. This module doesn't try to detect that;
//! it just reports "full."

use core::cell::UnsafeCell;
use core::fmt;

use portable_atomic::{AtomicUsize, Ordering};

use crate::atomic::AtomicCell;
use crate::irq::InterruptLock;

/// A single-producer, single-consumer byte buffer. The `Buffer` struct
/// contains the controlling information for the buffer overall, and _borrows_
/// the storage.
///
/// See the module docs for details.
pub struct Buffer<'s> {
    storage: &'s [UnsafeCell<u8>],

    /// Number of unread bytes. Changed by both sides.
    count: AtomicCell<usize>,
    /// Index of next slot in `storage` to write. Must fall in the range
    /// `0..N`. Written only by the producer (and `clear`).
    write_idx: AtomicUsize,
    /// Index of next slot in `storage` to read. Must fall in the range `0..N`.
    /// Written only by the consumer (and `clear`).
    read_idx: AtomicUsize,
    /// Largest `count` seen since the last `clear`. Written only by the
    /// producer (and `clear`).
    max_count: AtomicUsize,
}

/// This type is easily sharable across contexts, because the only operations
/// that change it through a shared reference are the endpoints (at most one of
/// each) and `clear`, which masks interrupts.
unsafe impl Sync for Buffer<'_> {}

impl<'s> Buffer<'s> {
    /// Creates an empty buffer, borrowing `storage` (whose contents will be
    /// arbitrarily overwritten).
    pub fn new(storage: &'s mut [u8]) -> Self {
        // Safety: the cast we're about to do is memory-layout-compatible
        // because UnsafeCell<T> has the same memory layout as T. We can do
        // this because we have exclusive access to the memory backing
        // `storage` for 's.
        let storage: &'s [UnsafeCell<u8>] = unsafe {
            &*(storage as *mut [u8] as *const [UnsafeCell<u8>])
        };
        Self {
            storage,
            count: AtomicCell::new(0),
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            max_count: AtomicUsize::new(0),
        }
    }

    /// Creates a producer and consumer endpoint for this buffer. Note that an
    /// exclusive borrow of the buffer exists as long as either endpoint
    /// exists, ensuring that at most one of each endpoint exists at any point
    /// in the program.
    ///
    /// You can, however, drop the first pair of endpoints and make a new pair
    /// later -- that's fine.
    pub fn split(&mut self) -> (Producer<'_, 's>, Consumer<'_, 's>) {
        // The endpoints only need shared access; the &mut is what keeps a
        // second pair from being made while these live.
        let b: &Self = self;
        (
            Producer { b, _marker: crate::NotSyncMarker::default() },
            Consumer { b, _marker: crate::NotSyncMarker::default() },
        )
    }

    fn next_index(&self, i: usize) -> usize {
        // Avoids a division, which the Cortex-M0 doesn't have.
        if i + 1 == self.storage.len() { 0 } else { i + 1 }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unread bytes.
    pub fn size_used(&self) -> usize {
        self.count.load()
    }

    /// Number of bytes that can be written before the buffer is full.
    pub fn size_free(&self) -> usize {
        self.capacity() - self.size_used()
    }

    /// The largest `size_used` seen since the buffer was created or last
    /// cleared.
    pub fn max_used(&self) -> usize {
        self.max_count.load(Ordering::Relaxed)
    }

    /// Checks whether the buffer holds no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.size_used() == 0
    }

    /// Checks whether the buffer has no room for another byte.
    pub fn is_full(&self) -> bool {
        self.size_used() >= self.capacity()
    }

    /// Throws away all unread bytes and resets the high-water mark.
    ///
    /// Everything is reset inside one critical section, so an ISR on the
    /// other end sees either the old contents or an empty buffer.
    ///
    /// This must not be called from an ISR that can preempt a producer or
    /// consumer partway through an operation; call it from the lowest-priority
    /// side, or with both endpoints idle.
    pub fn clear(&self) {
        let lock = InterruptLock::new();
        self.count.store_locked(&lock, 0);
        self.write_idx.store(0, Ordering::Relaxed);
        self.read_idx.store(0, Ordering::Relaxed);
        self.max_count.store(0, Ordering::Relaxed);
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("used", &self.size_used())
            .field("max_used", &self.max_used())
            .finish()
    }
}

/// Buffer endpoint for writing data. Access to a `Producer` _only_ gives you
/// the right to write data and enquire about buffer occupancy.
///
/// See the module docs for more details.
pub struct Producer<'a, 's> {
    b: &'a Buffer<'s>,
    _marker: crate::NotSyncMarker,
}

impl Producer<'_, '_> {
    /// Attempts to write `byte` at the end of the buffer.
    ///
    /// Returns `true` if it was stored, or `false` if the buffer was full. On
    /// `false` the byte has _not_ been stored; whether to drop it or try again
    /// later is up to you.
    pub fn write(&mut self, byte: u8) -> bool {
        let b = self.b;
        if b.count.load() >= b.capacity() {
            return false;
        }

        let w = b.write_idx.load(Ordering::Relaxed);
        // Safety: this is unsafe due to the write through the UnsafeCell.
        // Because count < capacity, slot `w` is not between the read index
        // and the write index, so the consumer isn't looking at it; and
        // because we required a &mut, we're not racing any other writes.
        unsafe {
            *b.storage[w].get() = byte;
        }
        b.write_idx.store(b.next_index(w), Ordering::Relaxed);

        // Publish the byte only after it's in place.
        let c = b.count.increment();
        if c > b.max_count.load(Ordering::Relaxed) {
            b.max_count.store(c, Ordering::Relaxed);
        }
        true
    }

    /// Writes as many bytes from `data` as fit, returning how many were
    /// written. The rest are left for you to retry.
    pub fn write_slice(&mut self, data: &[u8]) -> usize {
        let mut n = 0;
        for &byte in data {
            if !self.write(byte) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Checks if there is room to write at least one byte. Because the
    /// `Producer` has exclusive control over data moving into the buffer, if
    /// this returns `true`, it stays `true` until you write through `self`.
    pub fn can_write(&self) -> bool {
        !self.b.is_full()
    }

    /// Returns the buffer this endpoint writes into.
    pub fn buffer(&self) -> &Buffer<'_> {
        self.b
    }
}

impl fmt::Debug for Producer<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Producer").field(self.b).finish()
    }
}

/// Buffer endpoint for reading data. Access to a `Consumer` _only_ gives you
/// the right to read data and enquire about buffer occupancy.
///
/// See the module docs for more details.
pub struct Consumer<'a, 's> {
    b: &'a Buffer<'s>,
    _marker: crate::NotSyncMarker,
}

impl Consumer<'_, '_> {
    /// Removes and returns the oldest unread byte, or `None` if the buffer is
    /// empty.
    pub fn read(&mut self) -> Option<u8> {
        let b = self.b;
        if b.count.load() == 0 {
            return None;
        }

        let r = b.read_idx.load(Ordering::Relaxed);
        // Safety: this is unsafe due to the read through the UnsafeCell.
        // Because count > 0, slot `r` holds a byte the producer has finished
        // writing and won't touch again until we release it below.
        let byte = unsafe { *b.storage[r].get() };
        b.read_idx.store(b.next_index(r), Ordering::Relaxed);

        // Release the slot only after we've taken the byte.
        b.count.decrement();
        Some(byte)
    }

    /// Reads bytes into `out` until it's full or the buffer is empty, returning
    /// how many were read.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in out {
            match self.read() {
                Some(byte) => *slot = byte,
                None => break,
            }
            n += 1;
        }
        n
    }

    /// Checks if there is at least one byte available to read. Because the
    /// `Consumer` has exclusive control over data moving out of the buffer, if
    /// this returns `true`, it stays `true` until you read through `self`.
    pub fn can_read(&self) -> bool {
        !self.b.is_empty()
    }

    /// Returns the buffer this endpoint reads from.
    pub fn buffer(&self) -> &Buffer<'_> {
        self.b
    }
}

impl fmt::Debug for Consumer<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Consumer").field(self.b).finish()
    }
}
