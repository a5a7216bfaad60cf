//! Deadline on the async path.
//!
//! The blocking path is never timed: `invoke` runs to completion whatever
//! the configured deadline. On the async path an elapsed deadline stops the
//! wait and drops the inner future; a computation that was handed off
//! elsewhere may keep running, and its result is discarded.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use conduit_runtime::Runnable;

/// Fails `invoke_async` with [`ConduitError::Timeout`] after a deadline
pub struct Timeout<R> {
    inner: R,
    after: Duration,
}

impl<R> Timeout<R> {
    /// Wrap `inner` with a deadline
    pub fn new(inner: R, after: Duration) -> Self {
        Self { inner, after }
    }

    /// The deadline
    #[must_use]
    pub const fn after(&self) -> Duration {
        self.after
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Timeout<R>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        self.inner.invoke(ctx, input)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        match tokio::time::timeout(self.after, self.inner.invoke_async(ctx, input)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation = self.inner.name(), after = ?self.after, "timed out");
                Err(ConduitError::Timeout {
                    operation: self.inner.name().to_string(),
                    after: self.after,
                })
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
