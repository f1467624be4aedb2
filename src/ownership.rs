// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Taking turns at a shared device without waiting for it.
//!
//! Some devices can't be shared at the granularity of a single call. A UART
//! that's halfway through printing one task's report shouldn't have another
//! task's bytes spliced into the middle. [`Ownership`] wraps such a device and
//! hands it out to one owner at a time.
//!
//! Nothing here ever waits. If you ask for the device and someone else has it
//! (or the device itself reports that it's still busy), you get `None`, and
//! the usual response is to return `false` from your task so the scheduler
//! calls you again later. There's no queue and no fairness: whoever asks first
//! after the device comes free gets it.
//!
//! # Owner ids
//!
//! When you open a free device you get back a [`Descriptor`], which carries an
//! [`OwnerId`]. That id is the *only* proof of ownership. Present it to
//! [`Ownership::open`] again (say, on your task's next run) and you get the
//! device right back; present it to [`Ownership::close`] and you give the
//! device up.
//!
//! Ids are minted by the arbiter from a generation counter that advances on
//! every grant and every release, skipping zero. So once you've closed, your
//! old id is dead for good: it can't reopen the device and it can't close
//! somebody else's session. Zero is [`OwnerId::NONE`], which never matches.
//!
//! If you'd rather not juggle ids by hand, a [`Holder`] keeps one for you.
//!
//! # Idle check
//!
//! Being un-owned isn't the same as being ready. A UART whose last owner
//! closed it may still be shifting out that owner's bytes, and the next owner
//! may want to change the baud rate. Resources therefore implement
//! [`Ownable::is_idle`], and a new owner is only admitted when it returns
//! `true`. (A device that doesn't care can just return `true`.) The current
//! owner re-entering with its id skips the check.

use core::ops::{Deref, DerefMut};

/// A resource that can be handed out by an [`Ownership`] arbiter.
pub trait Ownable {
    /// Checks whether the resource is in a state where it's safe to hand to a
    /// new owner.
    fn is_idle(&self) -> bool;
}

/// Proof of ownership issued by an [`Ownership`] arbiter. See the module docs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct OwnerId(u32);

impl OwnerId {
    /// The reserved "not an owner" id. Never matches a live session, so it's
    /// what you pass to `open` when you don't own the resource yet.
    pub const NONE: Self = Self(0);

    /// Checks whether this is [`OwnerId::NONE`].
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Gets the raw generation number, for logging.
    pub fn get(self) -> u32 {
        self.0
    }

    fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::NONE
    }
}

/// Running totals of how an [`Ownership`] arbiter has answered requests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct OwnershipStats {
    /// Fresh grants to a new owner. Re-entry by the current owner isn't
    /// counted.
    pub granted: u32,
    /// Requests refused because someone else owned the resource.
    pub busy: u32,
    /// Requests refused because the resource wasn't idle.
    pub not_idle: u32,
    /// Releases refused because the id didn't match the current owner.
    pub stale_closes: u32,
}

/// Arbiter granting exclusive access to a `T`. See the module docs.
#[derive(Debug)]
pub struct Ownership<T> {
    resource: T,
    /// Id of the current session if `owned`, or of the last one to end
    /// otherwise. Never `NONE`.
    generation: OwnerId,
    owned: bool,
    stats: OwnershipStats,
}

impl<T: Ownable> Ownership<T> {
    /// Wraps `resource`, which starts out un-owned.
    pub const fn new(resource: T) -> Self {
        Self {
            resource,
            generation: OwnerId(1),
            owned: false,
            stats: OwnershipStats {
                granted: 0,
                busy: 0,
                not_idle: 0,
                stale_closes: 0,
            },
        }
    }

    /// Asks for the resource.
    ///
    /// - If `id` is the current owner's id, you get the resource back (this is
    ///   how an owner picks up where it left off).
    /// - If someone else owns it, or nobody does but the resource isn't idle,
    ///   you get `None`.
    /// - Otherwise, you become the owner, under a newly minted id found in the
    ///   returned descriptor. Hang on to it.
    pub fn open(&mut self, id: OwnerId) -> Option<Descriptor<'_, T>> {
        if self.owned {
            if id == self.generation {
                return Some(Descriptor {
                    id,
                    resource: &mut self.resource,
                });
            }
            self.stats.busy = self.stats.busy.wrapping_add(1);
            crate::trace!("ownership: busy (held by {})", self.generation.get());
            return None;
        }

        if !self.resource.is_idle() {
            self.stats.not_idle = self.stats.not_idle.wrapping_add(1);
            crate::trace!("ownership: resource not idle");
            return None;
        }

        self.generation = self.generation.next();
        self.owned = true;
        self.stats.granted = self.stats.granted.wrapping_add(1);
        crate::trace!("ownership: granted {}", self.generation.get());
        Some(Descriptor {
            id: self.generation,
            resource: &mut self.resource,
        })
    }

    /// Gives up the resource.
    ///
    /// This succeeds only if `id` belongs to the current owner. On success the
    /// id is retired, and can't be used to open or close again. On failure,
    /// nothing changes and `id` is handed back to you in the `Err`; this is
    /// counted in [`OwnershipStats::stale_closes`], since it usually means
    /// something is confused about who owns what.
    pub fn close(&mut self, id: OwnerId) -> Result<(), OwnerId> {
        if !self.owned || id != self.generation {
            self.stats.stale_closes = self.stats.stale_closes.wrapping_add(1);
            crate::trace!("ownership: stale close {}", id.get());
            return Err(id);
        }
        self.generation = self.generation.next();
        self.owned = false;
        crate::trace!("ownership: closed {}", id.get());
        Ok(())
    }

    /// Takes the resource, runs `op` on it, and gives it back, all in one
    /// call. Returns `None` without running `op` if the resource couldn't be
    /// taken.
    ///
    /// The resource is released even if `op` panics.
    pub fn try_perform<R>(&mut self, op: impl FnOnce(&mut T) -> R) -> Option<R> {
        let id = self.open(OwnerId::NONE)?.id();
        let mut this = scopeguard::guard(self, move |this| {
            // Can't fail: we just opened it, and `op` can't reach the arbiter.
            let _ = this.close(id);
        });
        Some(op(&mut this.resource))
    }
}

impl<T> Ownership<T> {
    /// Gets shared access to the resource, regardless of who owns it.
    ///
    /// This is meant for status queries (how full is its buffer, say) that
    /// can't disturb the owner.
    pub fn peek(&self) -> &T {
        &self.resource
    }

    /// Checks whether anyone currently owns the resource.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Checks whether `id` currently owns the resource.
    pub fn is_owned_by(&self, id: OwnerId) -> bool {
        self.owned && id == self.generation
    }

    /// Returns the running request totals.
    pub fn stats(&self) -> OwnershipStats {
        self.stats
    }

    /// Unwraps the resource. Whoever owned it doesn't anymore.
    pub fn into_inner(self) -> T {
        self.resource
    }
}

/// Exclusive access to an owned resource, along with the owner's id.
///
/// This derefs to the resource. Dropping it does *not* give up ownership; only
/// [`Ownership::close`] does that, so you can drop this at the end of a task
/// and pick the resource back up next time with [`Descriptor::id`].
#[derive(Debug)]
pub struct Descriptor<'a, T> {
    id: OwnerId,
    resource: &'a mut T,
}

impl<T> Descriptor<'_, T> {
    /// The id proving ownership.
    pub fn id(&self) -> OwnerId {
        self.id
    }
}

impl<T> Deref for Descriptor<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource
    }
}

impl<T> DerefMut for Descriptor<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource
    }
}

/// Keeps track of an [`OwnerId`] across calls, for code that owns a resource
/// over several task runs.
///
/// Typically this lives in the task's context alongside whatever else the
/// task needs to remember:
///
/// ```ignore
/// fn report(_: &mut Task<Clk, Board>, b: &mut Board) -> bool {
///     let Some(mut uart) = b.report_hold.acquire(&mut b.uart) else {
///         return false; // try again later
///     };
///     if !uart.print(b"done\r\n") {
///         return false; // still ours next time
///     }
///     b.report_hold.release(&mut b.uart);
///     true
/// }
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Holder {
    id: OwnerId,
}

impl Holder {
    /// Creates a holder that doesn't own anything.
    pub const fn new() -> Self {
        Self { id: OwnerId::NONE }
    }

    /// Gets the resource, taking ownership first if we don't already have it.
    /// Returns `None` if it's not available.
    pub fn acquire<'o, T: Ownable>(
        &mut self,
        arbiter: &'o mut Ownership<T>,
    ) -> Option<&'o mut T> {
        let d = arbiter.open(self.id)?;
        self.id = d.id;
        Some(d.resource)
    }

    /// Checks whether this holder currently owns `arbiter`'s resource.
    pub fn holds<T>(&self, arbiter: &Ownership<T>) -> bool {
        arbiter.is_owned_by(self.id)
    }

    /// Gives up ownership, if we have it. Returns `true` if something was
    /// released.
    pub fn release<T: Ownable>(&mut self, arbiter: &mut Ownership<T>) -> bool {
        if self.id.is_none() {
            return false;
        }
        let released = arbiter.close(self.id).is_ok();
        self.id = OwnerId::NONE;
        released
    }

    /// The id we're holding, or `NONE`.
    pub fn id(&self) -> OwnerId {
        self.id
    }
}
