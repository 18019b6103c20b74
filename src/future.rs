// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The core single-assignment future type and its producer-facing
//! companion, [`SettableFuture`].

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use static_assertions::assert_impl_all;

use crate::delegate;
use crate::error::GetError;
use crate::listener::{self, DirectExecutor, Executor, ListenerNode};
use crate::stack::{self, Push, Stack};
use crate::state::{Settled, StateCell};
use crate::waiter::{self, WaitList};

/// A single-assignment, thread-safe future.
///
/// See the crate-level docs for the full contract. Every operation here is
/// safe to call from any thread at any time.
pub struct ListenableFuture<T> {
    state: StateCell<T, Arc<ListenableFuture<T>>>,
    waiters: WaitList,
    listeners: Stack<Entry<T>>,
    hooks: Hooks,
}

assert_impl_all!(ListenableFuture<i32>: Send, Sync);

/// The producer-side override surface, translated from the subclass hooks
/// upstream exposes (`interruptTask`, `afterDone`) into an explicit record.
/// Consumers holding only a `ListenableFuture` handle never see this.
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) interrupt_task: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) after_done: Option<Box<dyn Fn() + Send + Sync>>,
}

/// An entry on the listener stack: either a user callback or the internal
/// marker installed by `set_future` to resolve a delegating future once
/// its target completes.
enum Entry<T> {
    Callback(ListenerNode),
    DelegateResolve(Arc<ListenableFuture<T>>),
}

impl<T: Clone + Send + Sync + 'static> ListenableFuture<T> {
    /// Create a new, `Pending` future.
    pub fn new() -> Arc<Self> {
        Self::with_hooks(Hooks::default())
    }

    pub(crate) fn with_hooks(hooks: Hooks) -> Arc<Self> {
        Arc::new(Self {
            state: StateCell::new(),
            waiters: WaitList::new(),
            listeners: Stack::new(),
            hooks,
        })
    }

    /// If this future is currently `Delegating`, the future it delegates
    /// to. Used by [`delegate::chase`] to walk towards the bottom of a
    /// chain.
    pub(crate) fn current_delegate(&self) -> Option<Arc<ListenableFuture<T>>> {
        match self.state.settled() {
            Settled::Delegating => Some(self.state.delegate().clone()),
            _ => None,
        }
    }

    /// Whether this future has reached a terminal state, following any
    /// delegation chain transitively. A chain that cycles back on itself
    /// never reaches one, so this reports `false` for it, same as an
    /// ordinary `Pending` future.
    pub fn is_done(&self) -> bool {
        match self.state.settled() {
            Settled::Pending => false,
            Settled::Delegating => match delegate::chase(self.state.delegate().clone()) {
                delegate::Chase::Tail(end) => end.is_done(),
                delegate::Chase::Cycle => false,
            },
            Settled::Value | Settled::Failure | Settled::Cancelled => true,
        }
    }

    /// Whether this future is (transitively) cancelled. As with
    /// [`is_done`](Self::is_done), a cycling chain reports `false`.
    pub fn is_cancelled(&self) -> bool {
        match self.state.settled() {
            Settled::Pending => false,
            Settled::Delegating => match delegate::chase(self.state.delegate().clone()) {
                delegate::Chase::Tail(end) => end.is_cancelled(),
                delegate::Chase::Cycle => false,
            },
            Settled::Cancelled => true,
            Settled::Value | Settled::Failure => false,
        }
    }

    /// True only if the cancel that resolved *this* future's own
    /// `Cancelled` state carried the interrupt flag. An interrupt bit
    /// inherited from a delegated target is never reported here.
    pub fn was_interrupted(&self) -> bool {
        matches!(self.state.settled(), Settled::Cancelled) && self.state.interrupt()
    }

    /// Block the calling thread until this future (or, if delegating, the
    /// future at the end of its delegation chain) completes.
    ///
    /// A delegation chain that cycles back on itself (possible only via a
    /// race between two concurrent `set_future` calls; see
    /// [`ListenableFuture::set_future`]) behaves like an ordinary
    /// never-completing `Pending` future: this parks the calling thread
    /// rather than looping or recursing forever chasing the cycle.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn get(self: &Arc<Self>) -> Result<T, GetError> {
        self.get_blocking()
    }

    fn get_blocking(self: &Arc<Self>) -> Result<T, GetError> {
        loop {
            match self.state.settled() {
                Settled::Pending => {
                    if let Some(parker) = waiter::register(&self.waiters) {
                        parker.park();
                    }
                    // Either notified, or the stack was already closed; in
                    // both cases loop back and re-read `state`.
                }
                Settled::Delegating => match delegate::chase(self.clone()) {
                    delegate::Chase::Tail(end) => return end.get_blocking(),
                    delegate::Chase::Cycle => {
                        // No future anywhere in this cycle can resolve on
                        // its own. Park on this future's own waiter list
                        // exactly as a `Pending` future would; it is woken
                        // if the cycle is ever broken by an external
                        // `cancel` on any member.
                        if let Some(parker) = waiter::register(&self.waiters) {
                            parker.park();
                        }
                    }
                },
                Settled::Value | Settled::Failure | Settled::Cancelled => {
                    return self.unbox_terminal()
                }
            }
        }
    }

    /// As [`get`](Self::get), but give up and return
    /// [`GetError::TimedOut`] if `timeout` elapses first.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn get_timeout(self: &Arc<Self>, timeout: Duration) -> Result<T, GetError> {
        let deadline = Instant::now() + timeout;
        self.get_blocking_until(deadline)
    }

    fn get_blocking_until(self: &Arc<Self>, deadline: Instant) -> Result<T, GetError> {
        loop {
            match self.state.settled() {
                Settled::Pending => self.park_once_until(deadline)?,
                Settled::Delegating => match delegate::chase(self.clone()) {
                    delegate::Chase::Tail(end) => return end.get_blocking_until(deadline),
                    // Same fallback as `get_blocking`'s cycle branch, just
                    // bounded by `deadline` instead of parking unbounded.
                    delegate::Chase::Cycle => self.park_once_until(deadline)?,
                },
                Settled::Value | Settled::Failure | Settled::Cancelled => {
                    return self.unbox_terminal()
                }
            }
        }
    }

    /// Park once against `deadline`, or report a timeout. Returns `Ok(())`
    /// when the caller should loop back and re-read `state` (woken, or
    /// its budget isn't exhausted yet).
    fn park_once_until(&self, deadline: Instant) -> Result<(), GetError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(now, deadline));
        }
        match waiter::register(&self.waiters) {
            Some(parker) => {
                if parker.park_timeout(deadline) {
                    // Notified; loop back to read the result.
                } else if waiter::unregister(&self.waiters, &parker) {
                    let now = Instant::now();
                    return Err(timed_out(now, deadline));
                } else {
                    // Completion raced our timeout: either the driver
                    // already drained us (it will, or already did, call
                    // `unpark`) or the stack closed under us. Either way
                    // finishing this one park is bounded.
                    parker.park();
                }
            }
            None => {}
        }
        Ok(())
    }

    fn unbox_terminal(&self) -> Result<T, GetError> {
        match self.state.settled() {
            Settled::Value => Ok(self.state.value().clone()),
            Settled::Failure => Err(GetError::ExecutionFailed(self.state.failure().clone())),
            Settled::Cancelled => Err(GetError::Cancelled {
                cause: self.state.cancel_cause().cloned(),
            }),
            Settled::Pending | Settled::Delegating => {
                unreachable!("unbox_terminal called on a non-terminal state")
            }
        }
    }

    /// Register `task` to run on `executor` once this future completes.
    /// Runs immediately, on the calling thread, if the future is already
    /// done.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn add_listener(&self, executor: Arc<dyn Executor>, task: impl FnOnce() + Send + 'static) {
        let entry = Entry::Callback(ListenerNode::new(executor, Box::new(task)));
        match self.listeners.push(stack::Node::new(entry)) {
            Push::Linked => {}
            Push::Closed(node) => match node.into_value() {
                Entry::Callback(cb) => listener::dispatch(cb),
                Entry::DelegateResolve(_) => {
                    unreachable!("only set_future pushes a DelegateResolve entry")
                }
            },
        }
    }

    /// Complete this future with `value`. Returns whether this call won
    /// the commit.
    #[tracing::instrument(level = "trace", skip(self, value))]
    pub fn set_value(self: &Arc<Self>, value: T) -> bool {
        if self.state.commit_value(value) {
            self.drive_completion();
            true
        } else {
            false
        }
    }

    /// Complete this future with a failure. Returns whether this call won
    /// the commit.
    #[tracing::instrument(level = "trace", skip(self, err))]
    pub fn set_failure<E>(self: &Arc<Self>, err: E) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if self.state.commit_failure(crate::error::boxed(err)) {
            self.drive_completion();
            true
        } else {
            false
        }
    }

    /// Cancel this future. If `interrupt` is true, the producer-supplied
    /// `interrupt_task` hook (if any) runs once, on the winning thread,
    /// before the completion driver runs. Returns whether this call won
    /// the commit; a future that has already reached a terminal state (or
    /// whose delegation target already resolved it) cannot be cancelled.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn cancel(self: &Arc<Self>, interrupt: bool) -> bool {
        loop {
            let prior_target = match self.state.settled() {
                Settled::Delegating => Some(self.state.delegate().clone()),
                Settled::Pending => None,
                Settled::Value | Settled::Failure | Settled::Cancelled => return false,
            };

            let won = if prior_target.is_some() {
                self.state.resolve_delegate_to_cancelled(interrupt, None)
            } else {
                self.state.commit_cancelled(interrupt, None)
            };

            if won {
                if interrupt {
                    self.run_interrupt_hook();
                }
                self.drive_completion();
                if let Some(target) = prior_target {
                    let _ = target.cancel(interrupt);
                }
                return true;
            }

            // Lost the CAS: a concurrent transition landed first. If it
            // only moved us further into `Pending`/`Delegating` territory
            // (e.g. a `set_future` just installed `Delegating` while we
            // were reading `Pending`), try again against the new state;
            // this is the one commit that retries rather than giving up on
            // its first lost race.
            match self.state.settled() {
                Settled::Pending | Settled::Delegating => continue,
                Settled::Value | Settled::Failure | Settled::Cancelled => return false,
            }
        }
    }

    fn run_interrupt_hook(&self) {
        if let Some(hook) = &self.hooks.interrupt_task {
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook()));
            if let Err(payload) = result {
                let message = crate::error::describe_panic(&*payload);
                tracing::warn!(error = %message, "interrupt_task hook panicked");
            }
        }
    }

    /// Ask this future to mirror `target`'s eventual outcome.
    ///
    /// Returns `true` if this call installed the delegation (or, on the
    /// fast path, completed this future directly because `target` was
    /// already done). Returns `false` if this future was not `Pending`:
    /// if it had already been cancelled, `target` is cancelled in turn on
    /// a best-effort basis. Also returns `false`, leaving this future
    /// `Pending`, if linking to `target` would close a delegation cycle
    /// (whether directly, `a.set_future(a)`, or through any number of
    /// intermediate futures already delegating to one another).
    ///
    /// This check cannot be fully race-free against a second `set_future`
    /// call completing concurrently on another future in the same
    /// would-be cycle -- both can observe each other's side as not yet
    /// installed and each pass this check before either commits. `get`,
    /// `get_timeout`, `is_done`, and `is_cancelled` all tolerate a cycle
    /// that slips through this way; see [`delegate::chase`].
    #[tracing::instrument(level = "trace", skip(self, target))]
    pub fn set_future(self: &Arc<Self>, target: Arc<ListenableFuture<T>>) -> bool {
        if delegate::would_create_cycle(self, &target) {
            tracing::debug!("rejected a set_future call that would close a delegation cycle");
            return false;
        }

        match target.state.settled() {
            Settled::Value => {
                if self.state.commit_value(target.state.value().clone()) {
                    self.drive_completion();
                    return true;
                }
            }
            Settled::Failure => {
                if self.state.commit_failure(target.state.failure().clone()) {
                    self.drive_completion();
                    return true;
                }
            }
            Settled::Cancelled => {
                let interrupt = target.state.interrupt();
                let cause = target.state.cancel_cause().cloned();
                if self.state.commit_cancelled(interrupt, cause) {
                    self.drive_completion();
                    return true;
                }
            }
            Settled::Pending | Settled::Delegating => {}
        }

        match self.state.settled() {
            Settled::Cancelled => {
                let interrupt = self.state.interrupt();
                let _ = target.cancel(interrupt);
                return false;
            }
            s if s.is_terminal() => return false,
            _ => {}
        }

        if !self.state.commit_delegate(target.clone()) {
            if let Settled::Cancelled = self.state.settled() {
                let interrupt = self.state.interrupt();
                let _ = target.cancel(interrupt);
            }
            return false;
        }

        register_delegate_listener(self, &target);
        true
    }

    /// Drain and fire both wait-lists after a winning terminal commit.
    /// Flattens any chain of delegation resolutions into one loop instead
    /// of recursing through the executor once per link.
    fn drive_completion(self: &Arc<Self>) {
        unpark_all(&self.waiters);

        let mut queue = VecDeque::new();
        enqueue_own_listeners(self, &mut queue);

        while let Some(item) = queue.pop_front() {
            match item {
                QueueItem::Callback(node) => listener::dispatch(node),
                QueueItem::DelegateResolve { source, delegating } => {
                    if settle_delegate(&source, &delegating) {
                        unpark_all(&delegating.waiters);
                        enqueue_own_listeners(&delegating, &mut queue);
                    }
                }
                QueueItem::AfterDone(future) => run_after_done(&future),
            }
        }
    }
}

fn timed_out(now: Instant, deadline: Instant) -> GetError {
    GetError::TimedOut {
        overshoot: Some(now.saturating_duration_since(deadline)),
    }
}

fn unpark_all(waiters: &WaitList) {
    for node in waiters.drain() {
        node.into_value().unpark();
    }
}

enum QueueItem<T> {
    Callback(ListenerNode),
    DelegateResolve {
        source: Arc<ListenableFuture<T>>,
        delegating: Arc<ListenableFuture<T>>,
    },
    AfterDone(Arc<ListenableFuture<T>>),
}

fn enqueue_own_listeners<T: Clone + Send + Sync + 'static>(
    future: &Arc<ListenableFuture<T>>,
    queue: &mut VecDeque<QueueItem<T>>,
) {
    // The stack yields nodes LIFO; reverse once here so dispatch runs in
    // registration order.
    let mut drained: Vec<Entry<T>> = future.listeners.drain().map(|n| n.into_value()).collect();
    drained.reverse();
    for entry in drained {
        match entry {
            Entry::Callback(node) => queue.push_back(QueueItem::Callback(node)),
            Entry::DelegateResolve(delegating) => queue.push_back(QueueItem::DelegateResolve {
                source: future.clone(),
                delegating,
            }),
        }
    }
    queue.push_back(QueueItem::AfterDone(future.clone()));
}

fn settle_delegate<T: Clone + Send + Sync + 'static>(
    source: &Arc<ListenableFuture<T>>,
    delegating: &Arc<ListenableFuture<T>>,
) -> bool {
    match source.state.settled() {
        Settled::Value => delegating
            .state
            .resolve_delegate_to_value(source.state.value().clone()),
        Settled::Failure => delegating
            .state
            .resolve_delegate_to_failure(source.state.failure().clone()),
        Settled::Cancelled => delegating
            .state
            .resolve_delegate_to_cancelled(false, source.state.cancel_cause().cloned()),
        Settled::Pending | Settled::Delegating => {
            unreachable!("delegate-resolve only runs once `source` is terminal")
        }
    }
}

fn run_after_done<T>(future: &Arc<ListenableFuture<T>>) {
    if let Some(hook) = &future.hooks.after_done {
        let result = panic::catch_unwind(AssertUnwindSafe(|| hook()));
        if let Err(payload) = result {
            let message = crate::error::describe_panic(&*payload);
            tracing::warn!(error = %message, "after_done hook panicked");
        }
    }
}

fn register_delegate_listener<T: Clone + Send + Sync + 'static>(
    this: &Arc<ListenableFuture<T>>,
    target: &Arc<ListenableFuture<T>>,
) {
    let entry = Entry::DelegateResolve(this.clone());
    match target.listeners.push(stack::Node::new(entry)) {
        Push::Linked => {}
        Push::Closed(node) => {
            // `target` completed between our terminal check in
            // `set_future` and this registration; resolve inline rather
            // than leaving a registration that will never fire.
            if let Entry::DelegateResolve(delegating) = node.into_value() {
                if settle_delegate(target, &delegating) {
                    delegating.drive_completion();
                }
            }
        }
    }
}

/// The producer-facing half of a [`ListenableFuture`]: the same instance,
/// but exposing `set_value`/`set_failure`/`cancel`/`set_future` without
/// requiring the caller to have constructed the future itself.
///
/// Most code that owns a result it will eventually produce should hold a
/// `SettableFuture`, hand [`SettableFuture::future`]'s return value to
/// consumers, and call the producer methods here once the result is
/// known.
pub struct SettableFuture<T> {
    inner: Arc<ListenableFuture<T>>,
}

impl<T: Clone + Send + Sync + 'static> SettableFuture<T> {
    pub fn new() -> Self {
        Self::with_hooks(None, None)
    }

    /// Construct with the producer override hooks translated from
    /// upstream's subclass-overridable `interruptTask`/`afterDone`.
    pub fn with_hooks(
        interrupt_task: Option<Box<dyn Fn() + Send + Sync>>,
        after_done: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        Self {
            inner: ListenableFuture::with_hooks(Hooks {
                interrupt_task,
                after_done,
            }),
        }
    }

    /// The consumer-facing handle, shared with the producer's own copy.
    pub fn future(&self) -> Arc<ListenableFuture<T>> {
        self.inner.clone()
    }

    pub fn set_value(&self, value: T) -> bool {
        self.inner.set_value(value)
    }

    pub fn set_failure<E>(&self, err: E) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.inner.set_failure(err)
    }

    pub fn cancel(&self, interrupt: bool) -> bool {
        self.inner.cancel(interrupt)
    }

    pub fn set_future(&self, target: Arc<ListenableFuture<T>>) -> bool {
        self.inner.set_future(target)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SettableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}
