// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-assignment, thread-safe future.
//!
//! [`ListenableFuture`] is a result cell that can be completed exactly once,
//! either directly (`set_value`/`set_failure`/`cancel`) or by delegating to
//! another future of the same type (`set_future`). Consumers can block for
//! the result with [`ListenableFuture::get`]/[`ListenableFuture::get_timeout`],
//! poll it non-blockingly with `is_done`/`is_cancelled`, or register a
//! listener callback that runs once the future completes.
//!
//! The producer-facing operations on [`ListenableFuture`] are deliberately
//! `pub(crate)`-ish in spirit: most applications construct a future through
//! [`ListenableFuture::new`], hand the [`ListenableFuture`] handle to
//! consumers, and complete it themselves (or via a [`SettableFuture`]
//! wrapper) rather than exposing `set_value` to arbitrary callers. See
//! [`SettableFuture`] for that split.
//!
//! A handful of combinators are built on top of the core and live in
//! [`combinators`]: `transform`, `catch`, `aggregate_all`, and `combined_callable`.

mod delegate;
pub mod error;
mod future;
mod listener;
mod loom;
mod park;
mod stack;
mod state;
mod waiter;

pub mod combinators;

pub use error::GetError;
pub use future::{ListenableFuture, SettableFuture};
pub use listener::{DirectExecutor, Executor, RejectionPropagatingExecutor};
