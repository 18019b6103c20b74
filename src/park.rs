// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-waiter park/unpark primitive.
//!
//! This is the blocking-thread analogue of an async park/unpark gate: the
//! same `EMPTY` / `PARKED` / `NOTIFIED` state machine, but parking the
//! calling thread with [`std::thread::park`] rather than polling a future.
//! One [`Parker`] is created per call to
//! [`crate::ListenableFuture::get`]/`get_timeout`, handed to the waiter
//! stack, and unparked at most once by whichever producer operation
//! completes the future (or drops the waiter node on timeout-based
//! removal).

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

const EMPTY: u8 = 0;
const PARKED: u8 = 1;
const NOTIFIED: u8 = 2;

/// How long a waiter busy-spins before parking the OS thread, to absorb the
/// common case where completion lands a few instructions after the waiter
/// observed `Pending`.
pub const SPIN_BUDGET: u32 = 100;

/// How close to a timed wait's deadline the waiter switches from parking to
/// busy-spinning. Parking has wakeup latency that can overshoot a very
/// short remaining budget; spinning the last stretch trades CPU for
/// precision.
pub const SPIN_THRESHOLD: Duration = Duration::from_micros(1);

/// A single-use park/unpark gate for one waiting thread.
pub struct Parker {
    state: AtomicU8,
}

impl Parker {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
        }
    }

    /// Spin briefly, then block the calling thread until [`unpark`](Self::unpark)
    /// is called.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn park(&self) {
        for _ in 0..SPIN_BUDGET {
            if self.state.load(Ordering::Acquire) == NOTIFIED {
                self.state.store(EMPTY, Ordering::Relaxed);
                return;
            }
            std::hint::spin_loop();
        }

        loop {
            match self
                .state
                .compare_exchange(EMPTY, PARKED, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {}
                Err(NOTIFIED) => {
                    self.state.store(EMPTY, Ordering::Relaxed);
                    return;
                }
                Err(_) => unreachable!("parker state is only ever EMPTY, PARKED, or NOTIFIED"),
            }

            std::thread::park();

            if self
                .state
                .compare_exchange(NOTIFIED, EMPTY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            // Spurious wakeup (or we were never actually notified yet);
            // loop and park again.
        }
    }

    /// As [`park`](Self::park), but give up at `deadline` and return
    /// `false` if no notification arrived in time. On a `true` return the
    /// caller was definitely notified; on `false` it may race with a
    /// concurrent [`unpark`](Self::unpark) and must resolve that race
    /// itself (see [`crate::waiter`]'s removal protocol).
    ///
    /// A zero or already-elapsed deadline performs exactly one
    /// non-blocking read and returns without parking. In the final
    /// [`SPIN_THRESHOLD`] of the budget, this busy-spins instead of
    /// calling into the OS parker, since park/unpark wakeup latency can
    /// overshoot a sub-microsecond remaining budget.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn park_timeout(&self, deadline: Instant) -> bool {
        loop {
            if self.state.load(Ordering::Acquire) == NOTIFIED {
                self.state.store(EMPTY, Ordering::Relaxed);
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let remaining = deadline - now;
            if remaining <= SPIN_THRESHOLD {
                std::hint::spin_loop();
                continue;
            }

            match self
                .state
                .compare_exchange(EMPTY, PARKED, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {}
                Err(NOTIFIED) => {
                    self.state.store(EMPTY, Ordering::Relaxed);
                    return true;
                }
                Err(_) => unreachable!("parker state is only ever EMPTY, PARKED, or NOTIFIED"),
            }

            std::thread::park_timeout(remaining);

            if self
                .state
                .compare_exchange(NOTIFIED, EMPTY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
            // Spurious wakeup, or we parked right up against the deadline;
            // loop back and re-evaluate against `deadline`.
        }
    }

    /// Wake the parked thread, or arm the next [`park`](Self::park) call to
    /// return immediately if it hasn't parked yet. Unparking an already
    /// notified parker is a harmless no-op.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn unpark(&self, thread: &std::thread::Thread) {
        if self.state.swap(NOTIFIED, Ordering::AcqRel) == PARKED {
            thread.unpark();
        }
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unpark_before_park_is_observed_immediately() {
        let parker = Arc::new(Parker::new());
        parker.unpark(&thread::current());
        parker.park(); // must not block
    }

    #[test]
    fn cross_thread_wakeup() {
        let parker = Arc::new(Parker::new());
        let waiter_thread = thread::current();

        let p2 = parker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            p2.unpark(&waiter_thread);
        });

        parker.park();
        handle.join().unwrap();
    }

    #[test]
    fn timeout_elapses_without_notification() {
        let parker = Parker::new();
        let start = Instant::now();
        let notified = parker.park_timeout(start + Duration::from_millis(30));
        assert!(!notified);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn timeout_path_observes_late_notification() {
        let parker = Arc::new(Parker::new());
        let waiter_thread = thread::current();

        let p2 = parker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            p2.unpark(&waiter_thread);
        });

        let notified = parker.park_timeout(Instant::now() + Duration::from_secs(5));
        assert!(notified);
        handle.join().unwrap();
    }

    #[test]
    fn already_elapsed_deadline_does_not_park() {
        let parker = Parker::new();
        let notified = parker.park_timeout(Instant::now());
        assert!(!notified);
    }
}
