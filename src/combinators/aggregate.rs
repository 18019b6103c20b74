// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `aggregate_all`: join a set of futures into one future of their
//! collected values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::GetError;
use crate::future::ListenableFuture;
use crate::listener::Executor;

use super::Forwarded;

/// Build a future that resolves to the `Vec` of every input's value, in
/// input order, once all inputs have succeeded.
///
/// The first input to fail or be cancelled fails or cancels the
/// aggregate immediately; whichever other inputs are still pending settle
/// on their own, and their eventual outcomes are discarded.
pub fn aggregate_all<T>(
    inputs: &[Arc<ListenableFuture<T>>],
    executor: Arc<dyn Executor>,
) -> Arc<ListenableFuture<Vec<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    let output = ListenableFuture::<Vec<T>>::new();

    if inputs.is_empty() {
        output.set_value(Vec::new());
        return output;
    }

    let slots = Arc::new(Mutex::new(vec![None; inputs.len()]));
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));

    for (index, input) in inputs.iter().enumerate() {
        let out = output.clone();
        let slots = slots.clone();
        let remaining = remaining.clone();
        let source = input.clone();
        input.add_listener(executor.clone(), move || match source.get() {
            Ok(value) => {
                slots.lock().unwrap()[index] = Some(value);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let collected = slots
                        .lock()
                        .unwrap()
                        .iter_mut()
                        .map(|slot| {
                            slot.take()
                                .expect("every slot is filled once remaining reaches zero")
                        })
                        .collect();
                    out.set_value(collected);
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
    fn collects_all_values_in_order() {
        let inputs: Vec<_> = (0..5).map(|_| ListenableFuture::<i32>::new()).collect();
        let joined = aggregate_all(&inputs, Arc::new(DirectExecutor));

        for (i, input) in inputs.iter().enumerate() {
            input.set_value(i as i32 * 10);
        }

        assert_eq!(joined.get().unwrap(), vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn empty_input_resolves_immediately() {
        let inputs: Vec<Arc<ListenableFuture<i32>>> = Vec::new();
        let joined = aggregate_all(&inputs, Arc::new(DirectExecutor));
        assert_eq!(joined.get().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn first_failure_wins() {
        let a = ListenableFuture::<i32>::new();
        let b = ListenableFuture::<i32>::new();
        let joined = aggregate_all(&[a.clone(), b.clone()], Arc::new(DirectExecutor));

        a.set_failure(Boom);
        b.set_value(1);

        assert!(matches!(joined.get(), Err(GetError::ExecutionFailed(_))));
    }

    #[test]
    fn cancellation_propagates() {
        let a = ListenableFuture::<i32>::new();
        let b = ListenableFuture::<i32>::new();
        let joined = aggregate_all(&[a.clone(), b.clone()], Arc::new(DirectExecutor));

        a.cancel(false);
        b.set_value(1);

        assert!(joined.is_cancelled());
    }
}
