// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking-thread registration for [`crate::ListenableFuture::get`] and
//! `get_timeout`.
//!
//! Each call to `get`/`get_timeout` that finds the future still pending
//! registers a [`WaiterHandle`] on the future's waiter [`Stack`], then parks
//! on a [`Parker`] shared with that handle. The completion driver drains the
//! waiter stack exactly once, when the future settles, and unparks every
//! handle it finds there. A call that times out first removes its own
//! handle from the stack rather than leaving it to be drained later.

use std::sync::Arc;
use std::thread::Thread;

use crate::park::Parker;
use crate::stack::{self, Push, RemoveOutcome, Stack};

pub(crate) struct WaiterHandle {
    thread: Thread,
    parker: Arc<Parker>,
}

impl WaiterHandle {
    /// Wake the thread that registered this handle.
    pub(crate) fn unpark(&self) {
        self.parker.unpark(&self.thread);
    }
}

pub(crate) type WaitList = Stack<WaiterHandle>;

/// Register the calling thread as a waiter. Returns the [`Parker`] to block
/// on, or `None` if the future had already completed (the waiter stack was
/// already drained), in which case there is nothing to wait for.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn register(waiters: &WaitList) -> Option<Arc<Parker>> {
    let parker = Arc::new(Parker::new());
    let handle = WaiterHandle {
        thread: std::thread::current(),
        parker: parker.clone(),
    };
    match waiters.push(stack::Node::new(handle)) {
        Push::Linked => Some(parker),
        Push::Closed(_) => None,
    }
}

/// Remove the calling thread's own registration after a timed-out wait.
///
/// Returns `true` if the registration was found and removed, meaning no
/// notification is coming and the caller may safely report a timeout.
/// Returns `false` if the future completed concurrently: either the
/// completion driver already drained this handle (and has unparked it, or
/// is about to), or -- in principle -- the handle could not be found for
/// some other reason. Either way the caller must not report a timeout
/// without first confirming it was actually notified.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn unregister(waiters: &WaitList, parker: &Arc<Parker>) -> bool {
    matches!(
        waiters.remove_where(|handle| Arc::ptr_eq(&handle.parker, parker)),
        RemoveOutcome::Removed(_)
    )
}
