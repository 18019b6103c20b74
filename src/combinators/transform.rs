// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `transform`: map a future's eventual value through a function.

use std::sync::Arc;

use crate::error::GetError;
use crate::future::ListenableFuture;
use crate::listener::Executor;

use super::{catch_panic, Forwarded};

/// Build a future that applies `f` to `input`'s value once it succeeds.
/// Failure and cancellation pass through to the returned future unchanged;
/// a panic inside `f` becomes the returned future's failure instead of
/// unwinding into `executor`.
pub fn transform<In, Out, F>(
    input: &Arc<ListenableFuture<In>>,
    executor: Arc<dyn Executor>,
    f: F,
) -> Arc<ListenableFuture<Out>>
where
    In: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
    F: FnOnce(In) -> Out + Send + 'static,
{
    let output = ListenableFuture::<Out>::new();
    let out = output.clone();
    let source = input.clone();
    input.add_listener(executor, move || match source.get() {
        Ok(value) => match catch_panic(move || f(value)) {
            Ok(transformed) => {
                out.set_value(transformed);
            }
            Err(panicked) => {
                out.set_failure(panicked);
            }
        },
        Err(GetError::Cancelled { .. }) => {
            out.cancel(false);
        }
        Err(GetError::ExecutionFailed(err)) => {
            out.set_failure(Forwarded(err));
        }
        Err(GetError::TimedOut { .. }) => {
            unreachable!("a listener only fires once its input is done")
        }
    });
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::DirectExecutor;

    #[test]
    fn transforms_value() {
        let input = ListenableFuture::<i32>::new();
        let output = transform(&input, Arc::new(DirectExecutor), |v| v * 2);
        input.set_value(21);
        assert_eq!(output.get().unwrap(), 42);
    }

    #[test]
    fn propagates_failure() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("boom")
            }
        }
        impl std::error::Error for Boom {}

        let input = ListenableFuture::<i32>::new();
        let output = transform(&input, Arc::new(DirectExecutor), |v: i32| v);
        input.set_failure(Boom);
        assert!(matches!(output.get(), Err(GetError::ExecutionFailed(_))));
    }

    #[test]
    fn propagates_cancellation() {
        let input = ListenableFuture::<i32>::new();
        let output = transform(&input, Arc::new(DirectExecutor), |v: i32| v);
        input.cancel(false);
        assert!(output.is_cancelled());
    }

    #[test]
    fn mapper_panic_becomes_failure() {
        let input = ListenableFuture::<i32>::new();
        let output = transform(&input, Arc::new(DirectExecutor), |_: i32| -> i32 {
            panic!("mapper exploded")
        });
        input.set_value(1);
        assert!(matches!(output.get(), Err(GetError::ExecutionFailed(_))));
    }

    #[test]
    fn registering_after_input_is_done_runs_inline() {
        let input = ListenableFuture::<i32>::new();
        input.set_value(10);
        let output = transform(&input, Arc::new(DirectExecutor), |v| v + 1);
        assert_eq!(output.get().unwrap(), 11);
    }
}
