// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error taxonomy surfaced by [`crate::ListenableFuture`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A type-erased, shareable error.
///
/// Failures and cancellation causes are stored behind this alias so that a
/// single boxed error can be cheaply cloned into every place that needs to
/// observe it (a delegation chain may copy the same failure into several
/// futures).
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// The error returned by [`crate::ListenableFuture::get`] and
/// [`crate::ListenableFuture::get_timeout`].
#[derive(Debug, Clone)]
pub enum GetError {
    /// The producer completed the future with [`set_failure`].
    ///
    /// [`set_failure`]: crate::ListenableFuture::set_failure
    ExecutionFailed(BoxError),

    /// The future was cancelled before it produced a value.
    Cancelled {
        /// The error that caused the cancellation, if the cancelling code
        /// supplied one.
        cause: Option<BoxError>,
    },

    /// `get_timeout` exceeded its budget before the future completed.
    TimedOut {
        /// How long past the requested budget the wait actually ran before
        /// giving up, when measurable.
        overshoot: Option<Duration>,
    },
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetError::ExecutionFailed(_) => f.write_str("future completed with an error"),
            GetError::Cancelled { .. } => f.write_str("future was cancelled"),
            GetError::TimedOut {
                overshoot: Some(overshoot),
            } => write!(f, "timed out waiting for future ({overshoot:?} over budget)"),
            GetError::TimedOut { overshoot: None } => {
                f.write_str("timed out waiting for future")
            }
        }
    }
}

impl StdError for GetError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            GetError::ExecutionFailed(err) => Some(&**err),
            GetError::Cancelled { cause: Some(err) } => Some(&**err),
            GetError::Cancelled { cause: None } | GetError::TimedOut { .. } => None,
        }
    }
}

/// Helper to box an arbitrary error into a [`BoxError`].
pub fn boxed<E>(err: E) -> BoxError
where
    E: StdError + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Render a caught panic payload as a human-readable string.
pub(crate) fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}
