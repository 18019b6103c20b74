// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Helpers for [`crate::ListenableFuture::set_future`] delegation.
//!
//! A delegating future always points at another
//! [`ListenableFuture<T>`](crate::ListenableFuture) of the identical
//! concrete type -- never a type-erased `dyn Future` -- which is what lets
//! this module walk a delegation chain with plain field access instead of
//! dynamic dispatch.
//!
//! Chains are walked with Floyd's tortoise-and-hare rather than a single
//! pointer: a lone pointer walk is correct for any finite chain but spins
//! forever (or, recursively, overflows the stack) on a cycle assembled
//! across two or more distinct futures (`a.set_future(b); b.set_future(a)`).
//! [`would_create_cycle`] uses the same bound to reject such a cycle before
//! it is ever installed, and [`chase`] uses it so that a cycle slipping
//! through anyway (via the unavoidable race between two concurrent
//! `set_future` calls that each observe the other's target as still
//! `Pending`) is detected rather than walked forever.

use std::sync::Arc;

use crate::future::ListenableFuture;

/// The result of walking a delegation chain to its end.
pub(crate) enum Chase<T> {
    /// The non-delegating future at the end of the chain (which may itself
    /// still be `Pending`, not necessarily terminal).
    Tail(Arc<ListenableFuture<T>>),
    /// The chain loops back on itself; there is no end to reach.
    Cycle,
}

/// Would installing `this -> target` as a delegation create a cycle?
/// Walks `target`'s existing chain looking for `this`, so this catches not
/// only the literal `this.set_future(this)` case but a longer chain
/// assembled across any number of distinct futures.
///
/// Uses the tortoise-and-hare bound so that a cycle already present in
/// `target`'s chain (which should not happen if this check always runs
/// before a commit, but can under a race between two concurrent
/// `set_future` calls) is treated as "yes, reject" rather than walked
/// forever.
pub(crate) fn would_create_cycle<T>(
    this: &Arc<ListenableFuture<T>>,
    target: &Arc<ListenableFuture<T>>,
) -> bool {
    let mut slow = target.clone();
    let mut fast = target.clone();
    loop {
        if Arc::ptr_eq(&slow, this) {
            return true;
        }
        fast = match fast.current_delegate() {
            Some(next) if Arc::ptr_eq(&next, this) => return true,
            Some(next) => next,
            None => return false,
        };
        fast = match fast.current_delegate() {
            Some(next) if Arc::ptr_eq(&next, this) => return true,
            Some(next) => next,
            None => return false,
        };
        if Arc::ptr_eq(&slow, &fast) {
            // `target`'s own chain already cycles; don't extend it.
            return true;
        }
        slow = slow
            .current_delegate()
            .expect("fast cannot pass slow's tail without slow reaching one first");
    }
}

/// Walk a chain of `Delegating` cells down to whichever future currently
/// sits at the end of it, or report that the chain cycles.
///
/// Each step is a plain field read rather than a virtual call, so a finite
/// chain a thousand futures long is just a thousand loop iterations and no
/// extra stack frames. The walk is bounded even when the chain cycles: the
/// hare laps the tortoise in at most one cycle length, so this always
/// terminates instead of looping (or spinning) forever.
pub(crate) fn chase<T>(start: Arc<ListenableFuture<T>>) -> Chase<T> {
    let first = match start.current_delegate() {
        Some(next) => next,
        None => return Chase::Tail(start),
    };

    let mut slow = start;
    let mut fast = first;
    loop {
        if Arc::ptr_eq(&slow, &fast) {
            return Chase::Cycle;
        }
        fast = match fast.current_delegate() {
            Some(next) => next,
            None => return Chase::Tail(fast),
        };
        if Arc::ptr_eq(&slow, &fast) {
            return Chase::Cycle;
        }
        fast = match fast.current_delegate() {
            Some(next) => next,
            None => return Chase::Tail(fast),
        };
        slow = slow
            .current_delegate()
            .expect("fast cannot pass slow's tail without slow reaching one first");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_create_cycle_rejects_direct_self_reference() {
        let a = ListenableFuture::<i32>::new();
        assert!(would_create_cycle(&a, &a));
    }

    #[test]
    fn would_create_cycle_rejects_two_future_cycle() {
        let a = ListenableFuture::<i32>::new();
        let b = ListenableFuture::<i32>::new();
        assert!(a.set_future(b.clone()));
        // a is now Delegating(b); linking b -> a would close the loop.
        assert!(would_create_cycle(&b, &a));
    }

    #[test]
    fn would_create_cycle_rejects_longer_chain() {
        let a = ListenableFuture::<i32>::new();
        let b = ListenableFuture::<i32>::new();
        let c = ListenableFuture::<i32>::new();
        assert!(a.set_future(b.clone()));
        assert!(b.set_future(c.clone()));
        // c -> a would close a three-future loop.
        assert!(would_create_cycle(&c, &a));
    }

    #[test]
    fn would_create_cycle_allows_a_fresh_target() {
        let a = ListenableFuture::<i32>::new();
        let b = ListenableFuture::<i32>::new();
        assert!(!would_create_cycle(&a, &b));
    }

    #[test]
    fn chase_reaches_the_end_of_a_long_chain() {
        let futures: Vec<_> = (0..50).map(|_| ListenableFuture::<i32>::new()).collect();
        for pair in futures.windows(2) {
            assert!(pair[0].set_future(pair[1].clone()));
        }
        // The last future is still Pending, so the whole chain is still
        // `Delegating` down to it; `chase` should reach it directly.
        match chase(futures[0].clone()) {
            Chase::Tail(end) => assert!(Arc::ptr_eq(&end, futures.last().unwrap())),
            Chase::Cycle => panic!("not a cycle"),
        }
    }
}
