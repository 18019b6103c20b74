// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The single-assignment result cell at the heart of a
//! [`crate::ListenableFuture`].
//!
//! A [`StateCell`] moves through its states with a three-step commit
//! protocol rather than a single CAS on a sentinel object, because the
//! payload being installed (a value, a boxed error, a delegate handle) does
//! not fit in the width of the tag itself:
//!
//! 1. **Reserve** -- CAS the tag from an expected starting state (`PENDING`,
//!    or `DELEGATING` when a delegate is resolving its delegator) to the
//!    matching `COMMITTING_*` tag. Exactly one caller wins this CAS; losers
//!    learn they lost and back off.
//! 2. **Write** -- the winner writes its payload into the cell. No atomics
//!    are needed here: the `COMMITTING_*` tag is a lock that every other
//!    writer respects, and no reader may look at the payload until step 3.
//! 3. **Publish** -- a `Release` store moves the tag from `COMMITTING_*` to
//!    its terminal counterpart, making the write in step 2 visible to any
//!    thread that subsequently `Acquire`-loads the tag.
//!
//! Readers that observe a `COMMITTING_*` tag are witnessing a commit that is
//! already underway and will finish in, at most, the time it takes to write
//! one field; they spin rather than parking for it. This is the same
//! register-then-finish-registering shape as a `WaitCell`'s `REGISTERING`
//! state, applied to a result instead of a waker.

use std::cell::UnsafeCell;
use std::hint;
use std::mem::MaybeUninit;

use crossbeam_utils::CachePadded;
use static_assertions::const_assert_eq;

use crate::error::BoxError;
use crate::loom::atomic::{AtomicU8, Ordering};
use crate::loom::thread;

pub mod tag {
    pub const PENDING: u8 = 0;
    pub const COMMITTING_VALUE: u8 = 1;
    pub const VALUE: u8 = 2;
    pub const COMMITTING_FAILURE: u8 = 3;
    pub const FAILURE: u8 = 4;
    pub const COMMITTING_CANCELLED: u8 = 5;
    pub const CANCELLED: u8 = 6;
    pub const COMMITTING_DELEGATING: u8 = 7;
    pub const DELEGATING: u8 = 8;

    pub fn is_committing(t: u8) -> bool {
        matches!(
            t,
            COMMITTING_VALUE | COMMITTING_FAILURE | COMMITTING_CANCELLED | COMMITTING_DELEGATING
        )
    }

    pub fn name(t: u8) -> &'static str {
        match t {
            PENDING => "pending",
            COMMITTING_VALUE => "committing-value",
            VALUE => "value",
            COMMITTING_FAILURE => "committing-failure",
            FAILURE => "failure",
            COMMITTING_CANCELLED => "committing-cancelled",
            CANCELLED => "cancelled",
            COMMITTING_DELEGATING => "committing-delegating",
            DELEGATING => "delegating",
            _ => "unknown",
        }
    }
}

/// The payload installed by whichever producer operation wins the commit.
///
/// `D` is the delegate handle type; it is generic here purely to keep this
/// module decoupled from [`crate::future::ListenableFuture`] (in the same
/// spirit as `wait_cell.rs` staying generic over its waker type). The
/// concrete instantiation always uses `Arc<ListenableFuture<T>>`.
enum Payload<T, D> {
    Value(T),
    Failure(BoxError),
    Cancelled { interrupt: bool, cause: Option<BoxError> },
    Delegate(D),
}

// Every terminal tag is declared immediately after its `COMMITTING_*`
// precursor; `tag::name` and the match arms above rely on that pairing
// staying in lockstep if the constants are ever reordered.
const_assert_eq!(tag::VALUE, tag::COMMITTING_VALUE + 1);
const_assert_eq!(tag::FAILURE, tag::COMMITTING_FAILURE + 1);
const_assert_eq!(tag::CANCELLED, tag::COMMITTING_CANCELLED + 1);
const_assert_eq!(tag::DELEGATING, tag::COMMITTING_DELEGATING + 1);

/// The atomic result cell. See the module docs for the commit protocol.
pub struct StateCell<T, D> {
    tag: CachePadded<AtomicU8>,
    payload: UnsafeCell<MaybeUninit<Payload<T, D>>>,
}

/// What a reader found once a commit (if any was in flight) has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Pending,
    Value,
    Failure,
    Cancelled,
    Delegating,
}

impl Settled {
    fn from_tag(t: u8) -> Self {
        match t {
            tag::PENDING => Settled::Pending,
            tag::VALUE => Settled::Value,
            tag::FAILURE => Settled::Failure,
            tag::CANCELLED => Settled::Cancelled,
            tag::DELEGATING => Settled::Delegating,
            _ => unreachable!("settled tag must not be a committing tag"),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Settled::Pending | Settled::Delegating)
    }
}

impl<T, D> StateCell<T, D> {
    // See `Stack::new`'s comment in `stack.rs`: loom's atomics can't be
    // built in a `const fn`, so only the non-loom constructor is `const`.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            tag: CachePadded::new(AtomicU8::new(tag::PENDING)),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            tag: CachePadded::new(AtomicU8::new(tag::PENDING)),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// A quick, non-spinning peek at the tag. Useful for `is_done`-style
    /// queries where a caught-mid-commit answer of "not yet" is acceptable
    /// because the caller will simply be told again on the next poll.
    pub fn peek(&self) -> u8 {
        self.tag.load(Ordering::Acquire)
    }

    /// Block (by spinning) until no commit is in flight, and return the
    /// tag that settled out.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn settled(&self) -> Settled {
        let mut spins: u32 = 0;
        loop {
            let t = self.tag.load(Ordering::Acquire);
            if !tag::is_committing(t) {
                return Settled::from_tag(t);
            }
            spins += 1;
            if spins > 64 {
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        }
    }

    /// Attempt to reserve the cell for a value/failure/cancel commit,
    /// starting from `PENDING`.
    fn try_reserve_from_pending(&self, committing: u8) -> bool {
        self.tag
            .compare_exchange(
                tag::PENDING,
                committing,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Attempt to reserve the cell for the *delegate's* completion,
    /// starting from `DELEGATING`. Used by the completion driver when the
    /// future this one delegated to has itself settled.
    fn try_reserve_from_delegating(&self, committing: u8) -> bool {
        self.tag
            .compare_exchange(
                tag::DELEGATING,
                committing,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Reserve, write, and publish a value in one call. Returns `false`
    /// without touching the payload if the cell was not in `PENDING`.
    pub fn commit_value(&self, value: T) -> bool {
        if !self.try_reserve_from_pending(tag::COMMITTING_VALUE) {
            return false;
        }
        self.write_and_publish(Payload::Value(value), tag::VALUE);
        true
    }

    pub fn commit_failure(&self, err: BoxError) -> bool {
        if !self.try_reserve_from_pending(tag::COMMITTING_FAILURE) {
            return false;
        }
        self.write_and_publish(Payload::Failure(err), tag::FAILURE);
        true
    }

    pub fn commit_cancelled(&self, interrupt: bool, cause: Option<BoxError>) -> bool {
        if !self.try_reserve_from_pending(tag::COMMITTING_CANCELLED) {
            return false;
        }
        self.write_and_publish(Payload::Cancelled { interrupt, cause }, tag::CANCELLED);
        true
    }

    pub fn commit_delegate(&self, target: D) -> bool {
        if !self.try_reserve_from_pending(tag::COMMITTING_DELEGATING) {
            return false;
        }
        self.write_and_publish(Payload::Delegate(target), tag::DELEGATING);
        true
    }

    /// Replace a settled `Delegating` state with the delegate's own
    /// outcome. Called by the completion driver, never by user code.
    pub fn resolve_delegate_to_value(&self, value: T) -> bool {
        if !self.try_reserve_from_delegating(tag::COMMITTING_VALUE) {
            return false;
        }
        self.replace_and_publish(Payload::Value(value), tag::VALUE);
        true
    }

    pub fn resolve_delegate_to_failure(&self, err: BoxError) -> bool {
        if !self.try_reserve_from_delegating(tag::COMMITTING_FAILURE) {
            return false;
        }
        self.replace_and_publish(Payload::Failure(err), tag::FAILURE);
        true
    }

    pub fn resolve_delegate_to_cancelled(&self, interrupt: bool, cause: Option<BoxError>) -> bool {
        if !self.try_reserve_from_delegating(tag::COMMITTING_CANCELLED) {
            return false;
        }
        self.replace_and_publish(Payload::Cancelled { interrupt, cause }, tag::CANCELLED);
        true
    }

    /// Chain to a second delegate without ever settling (delegate-to-a-
    /// delegate is flattened by the caller before it reaches here in the
    /// common case, but nothing stops a `DELEGATING` cell from being
    /// re-pointed while still unsettled).
    pub fn resolve_delegate_to_delegate(&self, target: D) -> bool {
        if !self.try_reserve_from_delegating(tag::COMMITTING_DELEGATING) {
            return false;
        }
        self.replace_and_publish(Payload::Delegate(target), tag::DELEGATING);
        true
    }

    /// Step 2+3 for a cell moving out of `PENDING`: the cell holds no prior
    /// payload, so we just initialize it.
    fn write_and_publish(&self, payload: Payload<T, D>, final_tag: u8) {
        // Safety: we hold the `COMMITTING_*` lock: we just won the CAS out
        // of `PENDING`, and nothing else may read the payload until we
        // publish below.
        unsafe {
            (*self.payload.get()).write(payload);
        }
        self.tag.store(final_tag, Ordering::Release);
    }

    /// Step 2+3 for a cell moving out of `DELEGATING`: the cell already
    /// holds an initialized `Payload::Delegate`, which must be dropped in
    /// place before the new payload is written.
    fn replace_and_publish(&self, payload: Payload<T, D>, final_tag: u8) {
        // Safety: same locking argument as `write_and_publish`; additionally
        // the existing payload is known-initialized (we only reach here
        // after a successful reserve out of `DELEGATING`, which is only
        // ever published by `write_and_publish`/`replace_and_publish` with
        // `Payload::Delegate`).
        unsafe {
            let slot = &mut *self.payload.get();
            std::ptr::drop_in_place(slot.as_mut_ptr());
            slot.write(payload);
        }
        self.tag.store(final_tag, Ordering::Release);
    }

    /// Read the committed value. Panics if the cell has not settled as
    /// `Value`; callers must check `settled()` first.
    pub fn value(&self) -> &T {
        debug_assert_eq!(self.tag.load(Ordering::Relaxed), tag::VALUE);
        // Safety: tag is `VALUE`, which is only ever published by
        // `write_and_publish`/`replace_and_publish` with `Payload::Value`,
        // and the payload is never touched again afterwards (single
        // assignment).
        match unsafe { (*self.payload.get()).assume_init_ref() } {
            Payload::Value(v) => v,
            _ => unreachable!("tag VALUE implies Payload::Value"),
        }
    }

    pub fn failure(&self) -> &BoxError {
        debug_assert_eq!(self.tag.load(Ordering::Relaxed), tag::FAILURE);
        unsafe {
            match (*self.payload.get()).assume_init_ref() {
                Payload::Failure(e) => e,
                _ => unreachable!("tag FAILURE implies Payload::Failure"),
            }
        }
    }

    pub fn cancel_cause(&self) -> Option<&BoxError> {
        debug_assert_eq!(self.tag.load(Ordering::Relaxed), tag::CANCELLED);
        unsafe {
            match (*self.payload.get()).assume_init_ref() {
                Payload::Cancelled { cause, .. } => cause.as_ref(),
                _ => unreachable!("tag CANCELLED implies Payload::Cancelled"),
            }
        }
    }

    /// Whether this cancellation carried the interrupt flag. Only
    /// meaningful once `settled()` is `Settled::Cancelled`.
    pub fn interrupt(&self) -> bool {
        debug_assert_eq!(self.tag.load(Ordering::Relaxed), tag::CANCELLED);
        unsafe {
            match (*self.payload.get()).assume_init_ref() {
                Payload::Cancelled { interrupt, .. } => *interrupt,
                _ => unreachable!("tag CANCELLED implies Payload::Cancelled"),
            }
        }
    }

    pub fn delegate(&self) -> &D {
        debug_assert_eq!(self.tag.load(Ordering::Relaxed), tag::DELEGATING);
        unsafe {
            match (*self.payload.get()).assume_init_ref() {
                Payload::Delegate(d) => d,
                _ => unreachable!("tag DELEGATING implies Payload::Delegate"),
            }
        }
    }
}

impl<T, D> Drop for StateCell<T, D> {
    fn drop(&mut self) {
        // A plain `Relaxed` load rather than `get_mut`: `&mut self` already
        // guarantees no concurrent access, and `get_mut` isn't part of
        // loom's mocked atomic API.
        let t = self.tag.load(Ordering::Relaxed);
        if tag::is_committing(t) {
            // A commit was left mid-flight, which can only happen if the
            // writer panicked between reserve and publish; nothing was
            // initialized for `PENDING`-originated commits, but a
            // `DELEGATING`-originated one left the prior `Delegate` payload
            // intact and un-dropped. Either way there is nothing sound to
            // do but leak rather than double-drop or read uninitialized
            // memory; this only happens after a panic has already unwound
            // past this cell's owner.
            return;
        }
        if t != tag::PENDING {
            // Safety: a non-`PENDING`, non-committing tag is only reached
            // after `write_and_publish`/`replace_and_publish` initialized
            // the payload to match.
            unsafe {
                std::ptr::drop_in_place((*self.payload.get()).as_mut_ptr());
            }
        }
    }
}

// Safety: access to the payload is serialized by the tag CAS/store
// protocol described in the module docs; once published, the payload is
// read-only for the rest of the cell's life.
unsafe impl<T: Send, D: Send> Send for StateCell<T, D> {}
unsafe impl<T: Send, D: Send> Sync for StateCell<T, D> {}
