// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `catch`: recover a future's failure into a value.

use std::sync::Arc;

use crate::error::{BoxError, GetError};
use crate::future::ListenableFuture;
use crate::listener::Executor;

use super::catch_panic;

/// Build a future that recovers from `input`'s failure by calling
/// `recover` with the failure's cause and substituting its result as this
/// future's value. Success and cancellation pass through unchanged; a
/// panic inside `recover` becomes the returned future's failure.
pub fn catch<T, F>(
    input: &Arc<ListenableFuture<T>>,
    executor: Arc<dyn Executor>,
    recover: F,
) -> Arc<ListenableFuture<T>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(&BoxError) -> T + Send + 'static,
{
    let output = ListenableFuture::<T>::new();
    let out = output.clone();
    let source = input.clone();
    input.add_listener(executor, move || match source.get() {
        Ok(value) => {
            out.set_value(value);
        }
        Err(GetError::Cancelled { .. }) => {
            out.cancel(false);
        }
        Err(GetError::ExecutionFailed(err)) => match catch_panic(move || recover(&err)) {
            Ok(recovered) => {
                out.set_value(recovered);
            }
            Err(panicked) => {
                out.set_failure(panicked);
            }
        },
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

    #[derive(Debug)]
    struct Boom;
    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("boom")
        }
    }
    impl std::error::Error for Boom {}

    #[test]
    fn recovers_from_failure() {
        let input = ListenableFuture::<i32>::new();
        let output = catch(&input, Arc::new(DirectExecutor), |_err| 7);
        input.set_failure(Boom);
        assert_eq!(output.get().unwrap(), 7);
    }

    #[test]
    fn leaves_success_untouched() {
        let input = ListenableFuture::<i32>::new();
        let output = catch(&input, Arc::new(DirectExecutor), |_err| 7);
        input.set_value(1);
        assert_eq!(output.get().unwrap(), 1);
    }

    #[test]
    fn leaves_cancellation_untouched() {
        let input = ListenableFuture::<i32>::new();
        let output = catch(&input, Arc::new(DirectExecutor), |_err| 7);
        input.cancel(false);
        assert!(output.is_cancelled());
    }

    #[test]
    fn recovery_panic_becomes_failure() {
        let input = ListenableFuture::<i32>::new();
        let output = catch(&input, Arc::new(DirectExecutor), |_err| -> i32 {
            panic!("recovery exploded")
        });
        input.set_failure(Boom);
        assert!(matches!(output.get(), Err(GetError::ExecutionFailed(_))));
    }
}
