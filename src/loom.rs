// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Facade over the atomics and thread primitives `stack.rs`/`state.rs`
//! build on, swapped for `loom`'s mocked equivalents under `#[cfg(loom)]`.
//!
//! Without this indirection, a `#[cfg(loom)]` test still runs the real,
//! uninstrumented `std::sync::atomic` types underneath -- loom has nothing
//! to schedule around, and the "model-checked" test passes whether or not
//! the code is actually race-free. Every atomic this crate's lock-free
//! structures touch is imported from here, never from `std::sync::atomic`
//! directly, so a `loom` build routes every load/store/CAS through loom's
//! scheduler instead.

#[cfg(loom)]
pub(crate) use loom::sync::atomic;
#[cfg(loom)]
pub(crate) use loom::thread;

#[cfg(not(loom))]
pub(crate) use std::sync::atomic;
#[cfg(not(loom))]
pub(crate) use std::thread;

/// Run `f` under loom's model checker, enumerating every thread
/// interleaving it can find. Outside `#[cfg(loom)]` builds this just calls
/// `f` once, so ordinary `cargo test` still exercises the same test bodies.
#[cfg(loom)]
pub(crate) fn model(f: impl Fn() + Send + Sync + 'static) {
    loom::model(f);
}

#[cfg(not(loom))]
pub(crate) fn model(f: impl FnOnce()) {
    f();
}
