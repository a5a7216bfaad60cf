//! Fluent resilience decorators.

use std::error::Error as StdError;
use std::time::Duration;

use conduit_core::ConduitError;
use conduit_runtime::{Constant, Runnable};
use tokio_util::sync::CancellationToken;

use crate::cancel::Cancellable;
use crate::fallback::{Fallback, FallbackScope};
use crate::retry::{Retry, RetryPolicy};
use crate::timeout::Timeout;

/// Adds retry, fallback, timeout and cancellation to every runnable
pub trait ResilienceExt<I, O>: Runnable<I, O> + Sized
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Retry failures under `policy`
    fn retry(self, policy: RetryPolicy) -> Retry<Self> {
        Retry::new(self, policy)
    }

    /// Run `substitute` on any non-fatal failure
    fn fallback<S>(self, substitute: S) -> Fallback<Self, S>
    where
        S: Runnable<I, O>,
    {
        Fallback::new(self, substitute)
    }

    /// Run `substitute` only for invocation failures of type `E`
    fn fallback_on<E, S>(self, substitute: S) -> Fallback<Self, S>
    where
        E: StdError + 'static,
        S: Runnable<I, O>,
    {
        Fallback::scoped(self, substitute, FallbackScope::kind::<E>())
    }

    /// Run `substitute` for failures accepted by `predicate`
    fn fallback_when<P, S>(self, predicate: P, substitute: S) -> Fallback<Self, S>
    where
        P: Fn(&ConduitError) -> bool + Send + Sync + 'static,
        S: Runnable<I, O>,
    {
        Fallback::scoped(self, substitute, FallbackScope::predicate(predicate))
    }

    /// Run `substitute` for failures within `scope`
    fn fallback_scoped<S>(self, scope: FallbackScope, substitute: S) -> Fallback<Self, S>
    where
        S: Runnable<I, O>,
    {
        Fallback::scoped(self, substitute, scope)
    }

    /// Return `value` on any non-fatal failure
    fn fallback_value(self, value: O) -> Fallback<Self, Constant<O>> {
        Fallback::new(self, Constant::new(value))
    }

    /// Fail the async path after `after`
    fn timeout(self, after: Duration) -> Timeout<Self> {
        Timeout::new(self, after)
    }

    /// Abort the async path when the context's token fires
    fn cancellable(self) -> Cancellable<Self> {
        Cancellable::new(self)
    }

    /// Abort the async path when `token` fires
    fn cancellable_with(self, token: CancellationToken) -> Cancellable<Self> {
        Cancellable::with_token(self, token)
    }
}

impl<I, O, R> ResilienceExt<I, O> for R
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
}
