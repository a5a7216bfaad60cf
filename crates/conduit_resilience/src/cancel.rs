//! Cancellation boundary.
//!
//! [`Cancellable`] races the async path against a cancellation token: the
//! token bound to the decorator if any, otherwise the nearest token in the
//! ambient context. The blocking path never consults a token.

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use conduit_runtime::Runnable;
use tokio_util::sync::CancellationToken;

/// Aborts `invoke_async` with [`ConduitError::Cancelled`] when a token fires
pub struct Cancellable<R> {
    inner: R,
    token: Option<CancellationToken>,
}

impl<R> Cancellable<R> {
    /// Observe the token carried by the ambient context
    pub fn new(inner: R) -> Self {
        Self { inner, token: None }
    }

    /// Observe a fixed token
    ///
    /// The token is also layered into the context handed to `inner`.
    pub fn with_token(inner: R, token: CancellationToken) -> Self {
        Self {
            inner,
            token: Some(token),
        }
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Cancellable<R>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        self.inner.invoke(ctx, input)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let ctx = match &self.token {
            Some(token) => ctx.with_cancellation(token.clone()),
            None => ctx.clone(),
        };
        let Some(token) = ctx.cancellation().cloned() else {
            return self.inner.invoke_async(&ctx, input).await;
        };
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(operation = self.inner.name(), "cancelled");
                Err(ConduitError::Cancelled)
            }
            result = self.inner.invoke_async(&ctx, input) => result,
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_runtime::FnRunnable;
    use std::time::Duration;

    fn slow() -> FnRunnable<u32, u32> {
        FnRunnable::from_async(|x: u32| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(x)
        })
    }

    #[tokio::test]
    async fn test_bound_token() {
        let token = CancellationToken::new();
        let r = Cancellable::with_token(slow(), token.clone());
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        assert!(r.invoke_async(&AmbientContext::new(), 1).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_context_token() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = AmbientContext::new().with_cancellation(token);
        let r = Cancellable::new(slow());
        assert!(r.invoke_async(&ctx, 1).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_without_token_runs_to_completion() {
        let r = Cancellable::new(FnRunnable::from_fn(|x: u32| Ok(x + 1)));
        assert_eq!(r.invoke_async(&AmbientContext::new(), 1).await.unwrap(), 2);
    }

    #[test]
    fn test_sync_path_ignores_token() {
        let token = CancellationToken::new();
        token.cancel();
        let r = Cancellable::with_token(FnRunnable::from_fn(|x: u32| Ok(x)), token);
        assert_eq!(r.invoke(&AmbientContext::new(), 3).unwrap(), 3);
    }
}
