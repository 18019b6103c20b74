// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Listener registration and dispatch for [`crate::ListenableFuture`].
//!
//! A registered listener is a `(Executor, FnOnce)` pair. If the future is
//! already done when it is registered, the task runs immediately (on
//! whichever thread called `add_listener`, via the supplied executor). If
//! the future is still pending, the pair is pushed onto the future's
//! listener [`Stack`](crate::stack::Stack) and dispatched by the completion
//! driver once it settles.
//!
//! Execution order between listeners is unspecified, matching the fact
//! that nothing about a single-assignment future gives listeners a
//! meaningful notion of relative priority.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::stack::{self, Push, Stack};

/// Runs a submitted task. Implementations decide *where* the task runs
/// (inline, on a thread pool, on an async runtime) but must not block
/// indefinitely inside `execute` itself except to hand the task off.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every task synchronously on the calling thread.
///
/// Registering a listener with a [`DirectExecutor`] means the listener may
/// run on the producer's thread, inside `set_value`/`set_failure`/`cancel`,
/// if the future was still pending at registration time. Use it only for
/// listeners that are fast and never themselves call back into this
/// future.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Wraps an [`Executor`] so that a panic raised while *submitting* the task
/// (as opposed to a panic inside the task body, which is that executor's
/// own concern) is captured and handed to `on_reject` instead of
/// unwinding into the completion driver.
///
/// The completion driver's own internal bookkeeping -- the listener
/// `set_future` registers to resolve a delegating future once its target
/// settles -- never goes through an `Executor` at all; it runs inline via
/// plain field access, the same trusted-peer shortcut a delegation chain
/// uses to avoid dynamic dispatch, so there is nothing for this wrapper to
/// protect there. It exists for callers who want a rejected submission on
/// one of *their own* `add_listener` calls turned into a visible failure
/// instead of silently dropped: pass `on_reject = |err| target.set_failure(err)`
/// to route it onto a future of their choosing.
pub struct RejectionPropagatingExecutor<E, F> {
    inner: E,
    on_reject: F,
}

impl<E, F> RejectionPropagatingExecutor<E, F>
where
    E: Executor,
    F: Fn(crate::error::BoxError) + Send + Sync,
{
    pub fn new(inner: E, on_reject: F) -> Self {
        Self { inner, on_reject }
    }
}

impl<E, F> Executor for RejectionPropagatingExecutor<E, F>
where
    E: Executor,
    F: Fn(crate::error::BoxError) + Send + Sync,
{
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        let inner = &self.inner;
        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.execute(task)));
        if let Err(payload) = result {
            (self.on_reject)(crate::error::boxed(SubmissionPanicked::new(payload)));
        }
    }
}

#[derive(Debug)]
struct SubmissionPanicked {
    message: String,
}

impl SubmissionPanicked {
    fn new(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self {
            message: crate::error::describe_panic(&*payload),
        }
    }
}

impl std::fmt::Display for SubmissionPanicked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SubmissionPanicked {}

/// A pending listener registration: an executor plus the task it will run.
pub(crate) struct ListenerNode {
    executor: Arc<dyn Executor>,
    task: Box<dyn FnOnce() + Send>,
}

impl ListenerNode {
    pub(crate) fn new(executor: Arc<dyn Executor>, task: Box<dyn FnOnce() + Send>) -> Self {
        Self { executor, task }
    }
}

pub(crate) type ListenerList = Stack<ListenerNode>;

/// Register a listener, or run it immediately if `listeners` has already
/// been closed (the future is done).
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn register(listeners: &ListenerList, node: ListenerNode) {
    match listeners.push(stack::Node::new(node)) {
        Push::Linked => {}
        Push::Closed(node) => dispatch(node.into_value()),
    }
}

/// Run a listener's task through its executor, logging (not propagating)
/// any panic raised while submitting it.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn dispatch(node: ListenerNode) {
    let ListenerNode { executor, task } = node;
    let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(task)));
    if let Err(payload) = result {
        let message = SubmissionPanicked::new(payload);
        tracing::warn!(error = %message, "listener task panicked during executor submission");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn direct_executor_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        DirectExecutor.execute(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejection_propagating_executor_catches_panic() {
        struct PanickingExecutor;
        impl Executor for PanickingExecutor {
            fn execute(&self, _task: Box<dyn FnOnce() + Send>) {
                panic!("submission refused");
            }
        }

        let rejected = Arc::new(AtomicUsize::new(0));
        let r = rejected.clone();
        let executor = RejectionPropagatingExecutor::new(PanickingExecutor, move |_err| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        executor.execute(Box::new(|| {}));
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_listener_list_dispatches_immediately() {
        let listeners = ListenerList::new();
        let _ = listeners.drain();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        register(
            &listeners,
            ListenerNode::new(
                Arc::new(DirectExecutor),
                Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
            ),
        );
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
