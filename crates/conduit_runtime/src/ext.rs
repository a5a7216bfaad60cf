//! Fluent composition methods for every [`Runnable`].

use std::any::Any;
use std::sync::Arc;

use conduit_core::{AmbientContext, ConduitResult, CorrelationId, TenantId, UserId};

use crate::combinator::{Filter, Map, MapWithInput, Pipe, Tap};
use crate::monitor::{MetricsCollector, Telemetry, TelemetryObserver};
use crate::runnable::{BoxRunnable, Runnable};
use crate::scope::WithContext;

/// Builder-style decorators available on any runnable
pub trait RunnableExt<I, O>: Runnable<I, O> + Sized
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Transform the output
    fn map<O2, F>(self, mapper: F) -> Map<Self, O, O2>
    where
        F: Fn(O) -> O2 + Send + Sync + 'static,
    {
        Map::new(self, move |output, _ctx: &AmbientContext| mapper(output))
    }

    /// Transform the output with access to the context
    fn map_context<O2, F>(self, mapper: F) -> Map<Self, O, O2>
    where
        F: Fn(O, &AmbientContext) -> O2 + Send + Sync + 'static,
    {
        Map::new(self, mapper)
    }

    /// Transform the output with access to the input and context
    fn map_with_input<O2, F>(self, mapper: F) -> MapWithInput<Self, I, O, O2>
    where
        F: Fn(&I, O, &AmbientContext) -> O2 + Send + Sync + 'static,
    {
        MapWithInput::new(self, mapper)
    }

    /// Observe the output without changing it
    fn tap<F>(self, observer: F) -> Tap<Self, O>
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        Tap::new(self, move |output: &O, _ctx: &AmbientContext| {
            observer(output);
            Ok(())
        })
    }

    /// Observe the output with access to the context; a failure propagates
    fn tap_context<F>(self, observer: F) -> Tap<Self, O>
    where
        F: Fn(&O, &AmbientContext) -> ConduitResult<()> + Send + Sync + 'static,
    {
        Tap::new(self, observer)
    }

    /// Return `default` without running when `predicate` rejects the input
    fn filter<P>(self, predicate: P, default: O) -> Filter<Self, I, O>
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Filter::new(
            self,
            move |input: &I, _ctx: &AmbientContext| Ok(predicate(input)),
            default,
        )
    }

    /// Like [`RunnableExt::filter`] with a fallible, context-aware predicate
    fn filter_context<P>(self, predicate: P, default: O) -> Filter<Self, I, O>
    where
        P: Fn(&I, &AmbientContext) -> ConduitResult<bool> + Send + Sync + 'static,
    {
        Filter::new(self, predicate, default)
    }

    /// Feed the output into `next`
    fn pipe<O2, B>(self, next: B) -> Pipe<Self, B, O>
    where
        O2: Send + 'static,
        B: Runnable<O, O2>,
    {
        Pipe::new(self, next)
    }

    /// Bind `value` under `key` for the wrapped runnable
    fn with_context<T>(self, key: impl Into<Arc<str>>, value: T) -> WithContext<Self, I>
    where
        T: Any + Send + Sync,
    {
        WithContext::value(self, key, value)
    }

    /// Bind a correlation id, generating one when `None` and none is present
    fn with_correlation_id(self, id: Option<CorrelationId>) -> WithContext<Self, I> {
        WithContext::correlation(self, id)
    }

    /// Bind the tenant computed from the input and context
    fn with_tenant<F>(self, extractor: F) -> WithContext<Self, I>
    where
        F: Fn(&I, &AmbientContext) -> TenantId + Send + Sync + 'static,
    {
        WithContext::tenant(self, extractor)
    }

    /// Bind a user id
    fn with_user(self, id: UserId) -> WithContext<Self, I> {
        WithContext::user(self, id)
    }

    /// Report every invocation to `observer` under `operation`
    fn telemetry<T>(self, operation: impl Into<Arc<str>>, observer: T) -> Telemetry<Self>
    where
        T: TelemetryObserver + 'static,
    {
        Telemetry::new(self, operation, observer)
    }

    /// Aggregate invocations into `collector`, reported under this runnable's name
    fn with_metrics(self, collector: &MetricsCollector) -> Telemetry<Self> {
        let operation: Arc<str> = Arc::from(self.name());
        Telemetry::new(self, operation, collector.clone())
    }

    /// Erase the concrete type
    fn boxed(self) -> BoxRunnable<I, O>
    where
        Self: 'static,
    {
        Arc::new(self)
    }
}

impl<I, O, R> RunnableExt<I, O> for R
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchRouter;
    use crate::runnable::FnRunnable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fluent_chain() {
        let taps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&taps);
        let r = FnRunnable::from_fn(|x: i32| Ok(x + 1))
            .filter(|x: &i32| *x >= 0, 0)
            .map(|x: i32| x * 10)
            .tap(move |_x: &i32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .pipe(FnRunnable::from_fn(|x: i32| Ok(format!("value={x}"))));
        let ctx = AmbientContext::new();

        assert_eq!(r.invoke(&ctx, 1).unwrap(), "value=20");
        assert_eq!(r.invoke_async(&ctx, -3).await.unwrap(), "value=0");
        assert_eq!(taps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_context_decorators_compose() {
        let r = FnRunnable::from_fn_with_context(|(): (), ctx: &AmbientContext| {
            Ok(format!(
                "{}/{}/{}",
                ctx.tenant_id().map_or("-", TenantId::as_str),
                ctx.user_id().map_or("-", UserId::as_str),
                ctx.get::<u32>("shard").copied().unwrap_or(0),
            ))
        })
        .with_context("shard", 7u32)
        .with_user(UserId::new("alice"))
        .with_tenant(|_input: &(), _ctx: &AmbientContext| TenantId::new("acme"));

        assert_eq!(r.invoke(&AmbientContext::new(), ()).unwrap(), "acme/alice/7");
    }

    #[test]
    fn test_with_metrics_uses_runnable_name() {
        let metrics = MetricsCollector::new();
        let r = FnRunnable::from_fn(|x: u8| Ok(x))
            .named("echo")
            .with_metrics(&metrics);
        assert_eq!(r.name(), "echo");
        r.invoke(&AmbientContext::new(), 1).unwrap();
        assert_eq!(metrics.snapshot().total, 1);
    }

    #[test]
    fn test_boxed_in_branch_table() {
        let small = FnRunnable::from_fn(|_x: u32| Ok("small")).boxed();
        let router = BranchRouter::new(FnRunnable::from_fn(|_x: u32| Ok("big")))
            .when(|x: &u32| *x < 10, small);
        assert_eq!(router.invoke(&AmbientContext::new(), 3).unwrap(), "small");
    }
}
