//! The execution contract.
//!
//! A [`Runnable`] exposes the same logical operation twice: [`Runnable::invoke`]
//! blocks and never suspends, [`Runnable::invoke_async`] may suspend wherever
//! the wrapped implementation chooses. The two paths are never bridged
//! implicitly: a runnable built only from an async implementation fails
//! `invoke` with [`ConduitError::UnsupportedSyncExecution`] instead of
//! blocking on its own future.
//!
//! Arguments are a single generic input. Several arguments travel as a
//! tuple, no arguments as `()`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// A stage that can be invoked both blocking and suspending
#[async_trait]
pub trait Runnable<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Blocking invocation
    ///
    /// # Errors
    ///
    /// Returns the wrapped computation's failure, or
    /// [`ConduitError::UnsupportedSyncExecution`] for async-only runnables.
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O>;

    /// Suspending invocation
    ///
    /// # Errors
    ///
    /// Returns the wrapped computation's failure, or a timeout or
    /// cancellation raised by an enclosing decorator.
    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O>;

    /// Operation name used in errors, logs and telemetry
    fn name(&self) -> &str {
        "runnable"
    }

    /// Suspending invocation that aborts when `token` fires
    ///
    /// The token is layered into the context so inner decorators (retry
    /// backoff, cancellable boundaries) observe it as well. The first of
    /// completion and cancellation wins; an already fired token never starts
    /// the computation.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Cancelled`] when the token fires first.
    async fn invoke_async_with_cancellation(
        &self,
        ctx: &AmbientContext,
        input: I,
        token: CancellationToken,
    ) -> ConduitResult<O> {
        let ctx = ctx.with_cancellation(token.clone());
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(operation = self.name(), "cancelled by caller");
                Err(ConduitError::Cancelled)
            }
            result = self.invoke_async(&ctx, input) => result,
        }
    }
}

/// Shared, type-erased runnable
pub type BoxRunnable<I, O> = Arc<dyn Runnable<I, O>>;

#[async_trait]
impl<I, O, R> Runnable<I, O> for Arc<R>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O> + ?Sized,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        (**self).invoke(ctx, input)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        (**self).invoke_async(ctx, input).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

type SyncImpl<I, O> = Arc<dyn Fn(I, &AmbientContext) -> ConduitResult<O> + Send + Sync>;
type AsyncImpl<I, O> =
    Arc<dyn Fn(I, AmbientContext) -> BoxFuture<'static, ConduitResult<O>> + Send + Sync>;

/// Leaf runnable built from plain closures
///
/// Holds a blocking implementation, an async implementation, or both. When
/// only the blocking one exists the async path runs it inline, so both
/// paths produce the same output.
pub struct FnRunnable<I, O> {
    name: Arc<str>,
    sync_impl: Option<SyncImpl<I, O>>,
    async_impl: Option<AsyncImpl<I, O>>,
}

impl<I, O> Clone for FnRunnable<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            sync_impl: self.sync_impl.clone(),
            async_impl: self.async_impl.clone(),
        }
    }
}

impl<I, O> FnRunnable<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Blocking implementation ignoring the context
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(I) -> ConduitResult<O> + Send + Sync + 'static,
    {
        Self::from_fn_with_context(move |input, _ctx: &AmbientContext| f(input))
    }

    /// Blocking implementation reading the context
    #[must_use]
    pub fn from_fn_with_context<F>(f: F) -> Self
    where
        F: Fn(I, &AmbientContext) -> ConduitResult<O> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from("fn"),
            sync_impl: Some(Arc::new(f)),
            async_impl: None,
        }
    }

    /// Async-only implementation ignoring the context
    #[must_use]
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<O>> + Send + 'static,
    {
        Self::from_async_with_context(move |input, _ctx| f(input))
    }

    /// Async-only implementation reading the context
    #[must_use]
    pub fn from_async_with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(I, AmbientContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<O>> + Send + 'static,
    {
        Self {
            name: Arc::from("async_fn"),
            sync_impl: None,
            async_impl: Some(Arc::new(move |input, ctx| f(input, ctx).boxed())),
        }
    }

    /// Both implementations of the same logical operation
    #[must_use]
    pub fn from_parts<S, F, Fut>(sync_impl: S, async_impl: F) -> Self
    where
        S: Fn(I, &AmbientContext) -> ConduitResult<O> + Send + Sync + 'static,
        F: Fn(I, AmbientContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<O>> + Send + 'static,
    {
        Self {
            name: Arc::from("dual_fn"),
            sync_impl: Some(Arc::new(sync_impl)),
            async_impl: Some(Arc::new(move |input, ctx| async_impl(input, ctx).boxed())),
        }
    }

    /// Set the operation name
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether `invoke` is supported
    #[must_use]
    pub fn supports_sync(&self) -> bool {
        self.sync_impl.is_some()
    }
}

#[async_trait]
impl<I, O> Runnable<I, O> for FnRunnable<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        match &self.sync_impl {
            Some(f) => f(input, ctx),
            None => Err(ConduitError::unsupported_sync(self.name.as_ref())),
        }
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        match (&self.async_impl, &self.sync_impl) {
            (Some(f), _) => f(input, ctx.clone()).await,
            (None, Some(f)) => f(input, ctx),
            // Constructors always install at least one implementation.
            (None, None) => Err(ConduitError::unsupported_sync(self.name.as_ref())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Leaf runnable returning a fixed value for any input
#[derive(Debug, Clone)]
pub struct Constant<O> {
    value: O,
}

impl<O> Constant<O> {
    /// Create a constant runnable
    #[must_use]
    pub const fn new(value: O) -> Self {
        Self { value }
    }

    /// The value returned on every call
    #[must_use]
    pub const fn value(&self) -> &O {
        &self.value
    }
}

#[async_trait]
impl<I, O> Runnable<I, O> for Constant<O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn invoke(&self, _ctx: &AmbientContext, _input: I) -> ConduitResult<O> {
        Ok(self.value.clone())
    }

    async fn invoke_async(&self, _ctx: &AmbientContext, _input: I) -> ConduitResult<O> {
        Ok(self.value.clone())
    }

    fn name(&self) -> &str {
        "constant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn square() -> FnRunnable<u64, u64> {
        FnRunnable::from_fn(|x: u64| Ok(x * x)).named("square")
    }

    #[test]
    fn test_sync_invoke() {
        let ctx = AmbientContext::new();
        assert_eq!(square().invoke(&ctx, 5).unwrap(), 25);
        assert_eq!(square().name(), "square");
    }

    #[tokio::test]
    async fn test_sync_and_async_equivalent() {
        let ctx = AmbientContext::new();
        let r = square();
        for x in 0..20 {
            assert_eq!(r.invoke(&ctx, x).unwrap(), r.invoke_async(&ctx, x).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_dual_parts_equivalent() {
        let r = FnRunnable::from_parts(
            |(a, b): (i32, i32), _ctx: &AmbientContext| Ok(a + b),
            |(a, b): (i32, i32), _ctx| async move {
                tokio::task::yield_now().await;
                Ok(a + b)
            },
        );
        let ctx = AmbientContext::new();
        assert_eq!(r.invoke(&ctx, (2, 3)).unwrap(), 5);
        assert_eq!(r.invoke_async(&ctx, (2, 3)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_async_only_rejects_sync() {
        let r = FnRunnable::from_async(|x: u32| async move { Ok(x + 1) }).named("fetch");
        let ctx = AmbientContext::new();

        let err = r.invoke(&ctx, 1).unwrap_err();
        match err {
            ConduitError::UnsupportedSyncExecution {
                operation,
                entry_point,
            } => {
                assert_eq!(operation, "fetch");
                assert_eq!(entry_point, "invoke_async");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.invoke_async(&ctx, 1).await.unwrap(), 2);
        assert!(!r.supports_sync());
    }

    #[test]
    fn test_unit_input() {
        let r = FnRunnable::from_fn(|(): ()| Ok("ready"));
        assert_eq!(r.invoke(&AmbientContext::new(), ()).unwrap(), "ready");
    }

    #[test]
    fn test_context_aware_leaf() {
        let r = FnRunnable::from_fn_with_context(|greeting: &'static str, ctx: &AmbientContext| {
            let user = ctx.user_id().map_or("anonymous", |u| u.as_str()).to_string();
            Ok(format!("{greeting}, {user}"))
        });
        let ctx = AmbientContext::new().with_user("alice".into());
        assert_eq!(r.invoke(&ctx, "hello").unwrap(), "hello, alice");
        assert_eq!(r.invoke(&AmbientContext::new(), "hi").unwrap(), "hi, anonymous");
    }

    #[test]
    fn test_constant() {
        let r = Constant::new(7u8);
        let value: u8 = Runnable::<&str, u8>::invoke(&r, &AmbientContext::new(), "ignored").unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_boxed_arc_forwards() {
        let boxed: BoxRunnable<u64, u64> = Arc::new(square());
        let ctx = AmbientContext::new();
        assert_eq!(boxed.invoke(&ctx, 3).unwrap(), 9);
        assert_eq!(boxed.invoke_async(&ctx, 4).await.unwrap(), 16);
        assert_eq!(boxed.name(), "square");
    }

    #[tokio::test]
    async fn test_cancellation_before_start_skips_work() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let r = FnRunnable::from_async(move |x: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(x) }
        });

        let token = CancellationToken::new();
        token.cancel();
        let err = r
            .invoke_async_with_cancellation(&AmbientContext::new(), 1, token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_mid_flight() {
        let r = FnRunnable::from_async(|x: u32| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(x)
        });
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = r
            .invoke_async_with_cancellation(&AmbientContext::new(), 1, token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_token_visible_to_inner_stage() {
        let r = FnRunnable::from_async_with_context(|(): (), ctx: AmbientContext| async move {
            Ok(ctx.cancellation().is_some())
        });
        let seen = r
            .invoke_async_with_cancellation(&AmbientContext::new(), (), CancellationToken::new())
            .await
            .unwrap();
        assert!(seen);
    }
}
