// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `combined_callable`: run a callable once a set of futures have all
//! succeeded, ignoring their values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::GetError;
use crate::future::ListenableFuture;
use crate::listener::Executor;

use super::{catch_panic, Forwarded};

/// Build a future that runs `callable` once every future in `inputs` has
/// succeeded, ignoring their values. `callable` runs on whichever input's
/// listener observes the last remaining success, via `executor`.
///
/// The first input to fail or be cancelled fails or cancels the result
/// without ever invoking `callable`.
pub fn combined_callable<T, Out, F>(
    inputs: &[Arc<ListenableFuture<T>>],
    executor: Arc<dyn Executor>,
    callable: F,
) -> Arc<ListenableFuture<Out>>
where
    T: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
    F: FnOnce() -> Out + Send + 'static,
{
    let output = ListenableFuture::<Out>::new();
    let callable = Arc::new(Mutex::new(Some(callable)));

    if inputs.is_empty() {
        run_callable(&output, &callable);
        return output;
    }

    let remaining = Arc::new(AtomicUsize::new(inputs.len()));

    for input in inputs {
        let out = output.clone();
        let remaining = remaining.clone();
        let callable = callable.clone();
        let source = input.clone();
        input.add_listener(executor.clone(), move || match source.get() {
            Ok(_) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    run_callable(&out, &callable);
                }
            }
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
    }

    output
}

fn run_callable<Out, F>(out: &Arc<ListenableFuture<Out>>, callable: &Mutex<Option<F>>)
where
    Out: Clone + Send + Sync + 'static,
    F: FnOnce() -> Out,
{
    let f = match callable.lock().unwrap().take() {
        Some(f) => f,
        // Already run (or raced and lost to a sibling); nothing to do.
        None => return,
    };
    match catch_panic(f) {
        Ok(value) => {
            out.set_value(value);
        }
        Err(panicked) => {
            out.set_failure(panicked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::DirectExecutor;

    #[derive(Debug)]
    struct Boom;
    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("boom")
        }
    }
    impl std::error::Error for Boom {}

    #[test]
    fn runs_callable_once_all_succeed() {
        let a = ListenableFuture::<()>::new();
        let b = ListenableFuture::<()>::new();
        let combined = combined_callable(&[a.clone(), b.clone()], Arc::new(DirectExecutor), || 99);

        a.set_value(());
        assert!(!combined.is_done());
        b.set_value(());
        assert_eq!(combined.get().unwrap(), 99);
    }

    #[test]
    fn empty_inputs_runs_immediately() {
        let inputs: Vec<Arc<ListenableFuture<()>>> = Vec::new();
        let combined = combined_callable(&inputs, Arc::new(DirectExecutor), || "done");
        assert_eq!(combined.get().unwrap(), "done");
    }

    #[test]
    fn failure_skips_callable() {
        let a = ListenableFuture::<()>::new();
        let b = ListenableFuture::<()>::new();
        let combined = combined_callable(&[a.clone(), b.clone()], Arc::new(DirectExecutor), || {
            panic!("should never run")
        });

        a.set_failure(Boom);
        b.set_value(());

        assert!(matches!(combined.get(), Err(GetError::ExecutionFailed(_))));
    }
}
