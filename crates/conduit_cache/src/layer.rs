//! The caching decorator.

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitResult};
use conduit_runtime::Runnable;

use crate::key::{CacheKey, ContextScope, InputKey};
use crate::policy::EvictionPolicy;
use crate::stats::CacheStats;
use crate::store::CacheStore;

type InputSelector<I> = Arc<dyn Fn(&I) -> String + Send + Sync>;

/// Memoizes the wrapped runnable's output per context scope and input
///
/// Both paths share one store, so a value computed by `invoke` is a hit for
/// `invoke_async` and the other way round.
pub struct Cached<R, I, O> {
    inner: R,
    store: Arc<CacheStore<CacheKey<I>, O>>,
    scope: ContextScope,
    input_key: Option<InputSelector<I>>,
}

impl<R, I, O> Cached<R, I, O>
where
    I: Eq + Hash + Clone,
    O: Clone,
{
    /// Wrap `inner` with a fresh store governed by `policy`
    pub fn new(inner: R, policy: EvictionPolicy) -> Self {
        Self::with_store(inner, Arc::new(CacheStore::new(policy)))
    }

    /// Wrap `inner` with an existing, possibly shared, store
    pub fn with_store(inner: R, store: Arc<CacheStore<CacheKey<I>, O>>) -> Self {
        Self {
            inner,
            store,
            scope: ContextScope::Global,
            input_key: None,
        }
    }

    /// Prefix keys with part of the ambient context
    #[must_use]
    pub fn with_scope(mut self, scope: ContextScope) -> Self {
        self.scope = scope;
        self
    }

    /// Key on a caller-selected string instead of the input value
    #[must_use]
    pub fn with_input_key<F>(mut self, selector: F) -> Self
    where
        F: Fn(&I) -> String + Send + Sync + 'static,
    {
        self.input_key = Some(Arc::new(selector));
        self
    }

    /// The backing store
    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore<CacheKey<I>, O>> {
        &self.store
    }

    /// Snapshot of the store counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Key for `input` under `ctx`
    #[must_use]
    pub fn key_for(&self, ctx: &AmbientContext, input: &I) -> CacheKey<I> {
        let input = match &self.input_key {
            Some(select) => InputKey::Selected(select(input)),
            None => InputKey::Value(input.clone()),
        };
        CacheKey::new(self.scope.resolve(ctx), input)
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Cached<R, I, O>
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let key = self.key_for(ctx, &input);
        self.store
            .get_or_compute_blocking(key, || self.inner.invoke(ctx, input))
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let key = self.key_for(ctx, &input);
        self.store
            .get_or_compute(key, || self.inner.invoke_async(ctx, input))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Adds [`CacheExt::cached`] to every runnable
pub trait CacheExt<I, O>: Runnable<I, O> + Sized
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Memoize outputs under `policy`
    fn cached(self, policy: EvictionPolicy) -> Cached<Self, I, O> {
        Cached::new(self, policy)
    }

    /// Memoize outputs in a shared store
    fn cached_in(self, store: Arc<CacheStore<CacheKey<I>, O>>) -> Cached<Self, I, O> {
        Cached::with_store(self, store)
    }
}

impl<I, O, R> CacheExt<I, O> for R
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    R: Runnable<I, O>,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::TenantId;
    use conduit_runtime::FnRunnable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counted_square(calls: &Arc<AtomicUsize>) -> FnRunnable<u64, u64> {
        let calls = Arc::clone(calls);
        FnRunnable::from_fn(move |x: u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(x * x)
        })
    }

    #[test]
    fn test_square_computed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls).cached(EvictionPolicy::None);
        let ctx = AmbientContext::new();
        assert_eq!(cached.invoke(&ctx, 5).unwrap(), 25);
        assert_eq!(cached.invoke(&ctx, 5).unwrap(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_and_async_share_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls).cached(EvictionPolicy::None);
        let ctx = AmbientContext::new();
        assert_eq!(cached.invoke(&ctx, 3).unwrap(), 9);
        assert_eq!(cached.invoke_async(&ctx, 3).await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls).cached(EvictionPolicy::ttl(Duration::from_millis(100)));
        let ctx = AmbientContext::new();

        cached.invoke_async(&ctx, 4).await.unwrap();
        cached.invoke_async(&ctx, 4).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        cached.invoke_async(&ctx, 4).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_lru_expires_then_evicts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls)
            .cached(EvictionPolicy::ttl_lru(Duration::from_millis(100), 2).unwrap());
        let ctx = AmbientContext::new();

        for x in [1, 2, 3] {
            cached.invoke_async(&ctx, x).await.unwrap();
        }
        assert_eq!(cached.stats().evictions, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cached.invoke(&ctx, 3).unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let stats = cached.stats();
        assert_eq!(stats.expirations, 1);
        assert!(stats.entries <= 2);
    }

    #[test]
    fn test_lru_sequence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls).cached(EvictionPolicy::lru(2).unwrap());
        let ctx = AmbientContext::new();
        for x in [1, 2, 3, 1] {
            cached.invoke(&ctx, x).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cached.stats().evictions, 2);
    }

    #[test]
    fn test_tenant_scope_isolates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = counted_square(&calls)
            .cached(EvictionPolicy::None)
            .with_scope(ContextScope::Tenant);
        let acme = AmbientContext::new().with_tenant(TenantId::new("acme"));
        let globex = AmbientContext::new().with_tenant(TenantId::new("globex"));

        cached.invoke(&acme, 2).unwrap();
        cached.invoke(&acme, 2).unwrap();
        cached.invoke(&globex, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_input_key_selector() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cached = FnRunnable::from_fn(move |(id, _trace): (u32, String)| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(id * 2)
        })
        .cached(EvictionPolicy::None)
        .with_input_key(|(id, _trace): &(u32, String)| id.to_string());

        let ctx = AmbientContext::new();
        cached.invoke(&ctx, (7, "a".to_string())).unwrap();
        cached.invoke(&ctx, (7, "b".to_string())).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_propagate_uncached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cached = FnRunnable::from_fn(move |x: u8| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(conduit_core::ConduitError::msg("cold start"))
            } else {
                Ok(x)
            }
        })
        .cached(EvictionPolicy::None);

        let ctx = AmbientContext::new();
        assert!(cached.invoke(&ctx, 1).is_err());
        assert_eq!(cached.invoke(&ctx, 1).unwrap(), 1);
        assert_eq!(cached.invoke(&ctx, 1).unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_store_between_decorators() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(CacheStore::new(EvictionPolicy::None));
        let a = counted_square(&calls).cached_in(Arc::clone(&store));
        let b = counted_square(&calls).cached_in(Arc::clone(&store));
        let ctx = AmbientContext::new();

        a.invoke_async(&ctx, 6).await.unwrap();
        assert_eq!(b.invoke_async(&ctx, 6).await.unwrap(), 36);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }
}
