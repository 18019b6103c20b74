// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A lock-free Treiber stack used for both the waiter stack and the
//! listener stack of a [`crate::ListenableFuture`].
//!
//! This is a classic Treiber stack (push/pop via CAS on the head pointer)
//! rather than an intrusive MPSC queue: unlike [the Vyukov-style queue used
//! elsewhere in this codebase's async runtime], this structure needs a
//! single "close and drain everything" operation rather than incremental
//! FIFO dequeue, and a stack is the simplest lock-free shape that gives us
//! that.
//!
//! Completion closes the stack exactly once: after [`Stack::drain`] has run,
//! the head is left pointing at a reserved tombstone value and every
//! subsequent [`Stack::push`] observes it and hands the node straight back
//! to the caller instead of linking it in.
//!
//! The tombstone is encoded by tagging the low bit of the head pointer: a
//! `Node<T>` is always allocated via `Box`, so its address is aligned to at
//! least the pointer width and never has the low bit set. This is the
//! "low-bit pointer tagging" scheme used when an atomic slot must carry
//! both a discriminator and a pointer-width payload.

use std::ptr;

use crossbeam_utils::CachePadded;

use crate::loom::atomic::{AtomicBool, AtomicPtr, Ordering};
use crate::loom::thread;

const TOMBSTONE_BIT: usize = 0b1;

/// A node in a [`Stack`]. Owned by whichever side holds it: the enqueuer
/// until it is linked in, the stack itself while linked, and the drainer
/// once it has been unlinked by [`Stack::drain`] or [`Stack::remove_where`].
pub struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            value,
            next: ptr::null_mut(),
        })
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self: Box<Self>) -> T {
        self.value
    }
}

/// Outcome of attempting to push a node onto a [`Stack`].
pub enum Push<T> {
    /// The node was linked onto the stack; it will be observed by the next
    /// [`Stack::drain`].
    Linked,
    /// The stack was already closed (drained). The pushed node is handed
    /// back so the caller can act on it immediately (e.g. dispatch a
    /// listener inline).
    Closed(Box<Node<T>>),
}

#[inline]
fn is_tombstone<T>(ptr: *mut Node<T>) -> bool {
    (ptr as usize) & TOMBSTONE_BIT != 0
}

#[inline]
fn tombstone<T>() -> *mut Node<T> {
    TOMBSTONE_BIT as *mut Node<T>
}

/// A lock-free Treiber stack, closeable exactly once.
///
/// `push` is always lock-free. `drain` and `remove_where` additionally take
/// a short-lived spinlock against each other (never against `push`): both
/// need to detach, inspect, and possibly reattach the whole chain, and
/// doing that safely against a second detacher requires mutual exclusion.
/// The lock is held only across a handful of pointer operations, never
/// across a park or a user callback.
pub struct Stack<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    removing: AtomicBool,
}

impl<T> Stack<T> {
    // Loom's atomics register themselves with its execution model at
    // construction time, so they can't be built in a `const fn`; only the
    // real `std` atomics used outside `#[cfg(loom)]` builds allow that.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            removing: AtomicBool::new(false),
        }
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            removing: AtomicBool::new(false),
        }
    }

    fn lock_for_removal(&self) {
        let mut spins: u32 = 0;
        while self
            .removing
            .compare_exchange_weak(
                false,
                true,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            spins += 1;
            if spins > 64 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn unlock_for_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }

    /// Push a node onto the stack, unless it has already been closed.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn push(&self, node: Box<Node<T>>) -> Push<T> {
        let raw = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if is_tombstone(head) {
                // Safety: `raw` was just produced by `Box::into_raw` above and
                // has not been linked into any list, so it is safe to
                // reconstitute it.
                let node = unsafe { Box::from_raw(raw) };
                return Push::Closed(node);
            }

            // Safety: `raw` is a fresh, exclusively-owned allocation; no one
            // else can be touching its `next` field yet.
            unsafe {
                (*raw).next = head;
            }

            match self
                .head
                .compare_exchange_weak(head, raw, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Push::Linked,
                Err(actual) => head = actual,
            }
        }
    }

    /// Close the stack and return every node currently linked, in LIFO
    /// (most-recently-pushed-first) order.
    ///
    /// After this call, every future [`push`](Self::push) observes the
    /// stack as closed. This may only meaningfully be called once per
    /// stack; a second call simply returns an empty list.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn drain(&self) -> Drain<T> {
        self.lock_for_removal();
        let head = self.head.swap(tombstone(), Ordering::AcqRel);
        self.unlock_for_removal();
        Drain {
            // `head` may itself already be the tombstone if `drain` somehow
            // ran twice; `Drain` treats that identically to an empty list.
            next: if is_tombstone(head) {
                ptr::null_mut()
            } else {
                head
            },
        }
    }

    /// Returns true once [`drain`](Self::drain) has run.
    pub fn is_closed(&self) -> bool {
        is_tombstone(self.head.load(Ordering::Acquire))
    }

    /// Remove the first linked node matching `pred`, leaving every other
    /// node linked. Used by a timed-out waiter to take itself out of the
    /// wait list instead of lingering until the future eventually
    /// completes and drains it.
    ///
    /// This is the expensive path: it detaches the *entire* chain, filters
    /// it in a plain `Vec`, and links the survivors back on one at a time.
    /// A timeout race is rare enough, and the chain short enough in
    /// practice, that this is preferable to threading hazard pointers
    /// through a stack that is otherwise just push/drain.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn remove_where<F>(&self, mut pred: F) -> RemoveOutcome<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.lock_for_removal();
        let detached = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if is_tombstone(detached) {
            self.head.store(tombstone(), Ordering::Release);
            self.unlock_for_removal();
            return RemoveOutcome::Closed;
        }

        let mut found = None;
        let mut remainder = Vec::new();
        let mut cursor = detached;
        while !cursor.is_null() {
            // Safety: we hold `removing`, so no other `drain`/`remove_where`
            // call can be touching this chain, and we just exclusively
            // detached it from `head`, so no `push` can be touching it
            // either.
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
            if found.is_none() && pred(node.value()) {
                found = Some(node);
            } else {
                remainder.push(node);
            }
        }

        for node in remainder {
            match self.push(node) {
                Push::Linked => {}
                Push::Closed(_) => {
                    unreachable!("stack cannot close while remove_where holds the removal lock")
                }
            }
        }

        self.unlock_for_removal();

        match found {
            Some(node) => RemoveOutcome::Removed(node),
            None => RemoveOutcome::NotFound,
        }
    }
}

/// Outcome of [`Stack::remove_where`].
pub enum RemoveOutcome<T> {
    /// The matching node was found and unlinked.
    Removed(Box<Node<T>>),
    /// No linked node matched `pred`.
    NotFound,
    /// The stack was already closed (drained); the caller's node is
    /// guaranteed to have been handed to that drain.
    Closed,
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        // Drop whatever is left linked (there should be nothing, in normal
        // use, once a future has completed and drained both stacks -- but a
        // future that is dropped while still `Pending` may still have
        // waiters or listeners linked).
        for _ in self.drain() {}
    }
}

/// Iterator over the nodes captured by [`Stack::drain`], oldest-push-last
/// (i.e. LIFO order; callers that need FIFO order must reverse it, which is
/// exactly what the completion driver does for the listener stack).
pub struct Drain<T> {
    next: *mut Node<T>,
}

impl<T> Iterator for Drain<T> {
    type Item = Box<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        // Safety: every non-null, non-tombstone pointer reachable from a
        // drained head was produced by `Box::into_raw` in `push` and is not
        // aliased by anything else once unlinked here.
        let node = unsafe { Box::from_raw(self.next) };
        self.next = node.next;
        Some(node)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self {}
    }
}

// Safety: `Stack` only ever exposes `T` behind operations that move
// ownership across threads via the atomic head pointer; it carries no
// thread-affine state of its own.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_order_is_lifo() {
        let stack = Stack::new();
        stack.push(Node::new(1));
        stack.push(Node::new(2));
        stack.push(Node::new(3));

        let drained: Vec<i32> = stack.drain().map(|n| n.into_value()).collect();
        assert_eq!(drained, vec![3, 2, 1]);
    }

    #[test]
    fn remove_where_finds_and_leaves_rest_linked() {
        let stack = Stack::new();
        stack.push(Node::new(1));
        stack.push(Node::new(2));
        stack.push(Node::new(3));

        match stack.remove_where(|v| *v == 2) {
            RemoveOutcome::Removed(node) => assert_eq!(*node.value(), 2),
            _ => panic!("expected to find 2"),
        }

        let mut remaining: Vec<i32> = stack.drain().map(|n| n.into_value()).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn remove_where_after_drain_reports_closed() {
        let stack = Stack::new();
        stack.push(Node::new(1));
        let _ = stack.drain();

        match stack.remove_where(|v| *v == 1) {
            RemoveOutcome::Closed => {}
            _ => panic!("expected Closed"),
        }
    }

    #[test]
    fn remove_where_missing_reports_not_found() {
        let stack = Stack::new();
        stack.push(Node::new(1));

        match stack.remove_where(|v| *v == 99) {
            RemoveOutcome::NotFound => {}
            _ => panic!("expected NotFound"),
        }
        let remaining: Vec<i32> = stack.drain().map(|n| n.into_value()).collect();
        assert_eq!(remaining, vec![1]);
    }

    #[test]
    fn push_after_drain_is_closed() {
        let stack = Stack::new();
        stack.push(Node::new(1));
        let _ = stack.drain();

        match stack.push(Node::new(2)) {
            Push::Closed(node) => assert_eq!(*node.value(), 2),
            Push::Linked => panic!("stack should be closed"),
        }
    }

    #[test]
    fn concurrent_pushes_are_all_observed() {
        let stack = Arc::new(Stack::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let stack = stack.clone();
                thread::spawn(move || {
                    stack.push(Node::new(i));
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        let mut drained: Vec<i32> = stack.drain().map(|n| n.into_value()).collect();
        drained.sort_unstable();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }
}
