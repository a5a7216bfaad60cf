//! Bounded retry.
//!
//! The wrapped runnable is attempted up to `max_attempts` times with a clone
//! of the input. Success returns immediately. When every attempt fails, the
//! last attempt's failure is returned as is, never wrapped.
//!
//! Missing sync implementations and cancellations are never retried. A
//! retry scope narrows further: failures outside it propagate after the
//! attempt that produced them.
//!
//! Backoff on the async path suspends and wakes early with
//! [`ConduitError::Cancelled`] when the context's cancellation token fires.
//! On the blocking path the behavior is chosen by [`SyncBackoff`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use conduit_runtime::Runnable;
use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;

/// Backoff handling on the blocking path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBackoff {
    /// Sleep the calling thread for the scheduled delay
    #[default]
    Block,
    /// Retry immediately
    Skip,
}

type RetryFilter = Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>;

/// Retry configuration
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    sync_backoff: SyncBackoff,
    filter: Option<RetryFilter>,
}

impl RetryPolicy {
    /// Create a policy without backoff that retries every failure
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> ConduitResult<Self> {
        if max_attempts == 0 {
            return Err(ConduitError::configuration(
                "max_attempts",
                "at least one attempt is required",
            ));
        }
        Ok(Self {
            max_attempts,
            backoff: Backoff::None,
            sync_backoff: SyncBackoff::default(),
            filter: None,
        })
    }

    /// Set the backoff schedule
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the blocking-path backoff behavior
    #[must_use]
    pub fn with_sync_backoff(mut self, sync_backoff: SyncBackoff) -> Self {
        self.sync_backoff = sync_backoff;
        self
    }

    /// Also retry invocation failures whose error is of type `E`
    ///
    /// The first scope set narrows retries to that type; each further
    /// scope widens it again.
    #[must_use]
    pub fn retry_on<E>(self) -> Self
    where
        E: StdError + 'static,
    {
        self.retry_if(ConduitError::is::<E>)
    }

    /// Also retry failures accepted by `predicate`
    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ConduitError) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(match self.filter.take() {
            Some(previous) => Arc::new(move |err: &ConduitError| previous(err) || predicate(err)),
            None => Arc::new(predicate),
        });
        self
    }

    /// Upper bound on attempts
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff schedule
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Blocking-path backoff behavior
    #[must_use]
    pub const fn sync_backoff(&self) -> SyncBackoff {
        self.sync_backoff
    }

    /// Whether `err` may be retried, ignoring the attempt budget
    #[must_use]
    pub fn is_retryable(&self, err: &ConduitError) -> bool {
        if err.is_fatal() {
            return false;
        }
        self.filter.as_ref().is_none_or(|filter| filter(err))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("sync_backoff", &self.sync_backoff)
            .field("scoped", &self.filter.is_some())
            .finish()
    }
}

async fn pause(ctx: &AmbientContext, delay: Duration) -> ConduitResult<()> {
    if delay.is_zero() {
        return Ok(());
    }
    match ctx.cancellation() {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(ConduitError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Retries the wrapped runnable according to a [`RetryPolicy`]
pub struct Retry<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R> Retry<R> {
    /// Wrap `inner`
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Policy in force
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what follows the failed attempt `attempt`
    ///
    /// Returns the delay before the next attempt, or `None` to give up.
    fn next_delay(&self, operation: &str, attempt: u32, err: &ConduitError) -> Option<Duration> {
        if !self.policy.is_retryable(err) {
            tracing::debug!(operation, attempt, error = %err, "failure not retryable");
            return None;
        }
        if attempt >= self.policy.max_attempts {
            tracing::warn!(operation, attempts = attempt, error = %err, "retries exhausted");
            return None;
        }
        let delay = self.policy.backoff.delay(attempt);
        tracing::debug!(operation, attempt, ?delay, error = %err, "retrying");
        Some(delay)
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Retry<R>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let mut attempt = 1;
        loop {
            let err = match self.inner.invoke(ctx, input.clone()) {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            let Some(delay) = self.next_delay(self.inner.name(), attempt, &err) else {
                return Err(err);
            };
            if self.policy.sync_backoff == SyncBackoff::Block && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let mut attempt = 1;
        loop {
            let err = match self.inner.invoke_async(ctx, input.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            let Some(delay) = self.next_delay(self.inner.name(), attempt, &err) else {
                return Err(err);
            };
            pause(ctx, delay).await?;
            attempt += 1;
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
