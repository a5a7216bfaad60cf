//! Context-binding decorators.
//!
//! [`WithContext`] layers exactly one binding onto the context it was handed
//! and passes the layered context to the wrapped runnable. The caller's
//! context value is untouched.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitResult, CorrelationId, TenantId, UserId};

use crate::runnable::Runnable;

type TenantExtractor<I> = Arc<dyn Fn(&I, &AmbientContext) -> TenantId + Send + Sync>;

enum Layer<I> {
    Value {
        key: Arc<str>,
        value: Arc<dyn Any + Send + Sync>,
    },
    Correlation(Option<CorrelationId>),
    Tenant(TenantExtractor<I>),
    User(UserId),
}

/// Runs the wrapped runnable under one additional context binding
pub struct WithContext<R, I> {
    inner: R,
    layer: Layer<I>,
}

impl<R, I> WithContext<R, I> {
    /// Bind `value` under `key`
    pub fn value<T>(inner: R, key: impl Into<Arc<str>>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            inner,
            layer: Layer::Value {
                key: key.into(),
                value: Arc::new(value),
            },
        }
    }

    /// Bind a correlation id
    ///
    /// With `None`, a call that already carries a correlation id keeps it and
    /// a call without one gets a freshly generated id.
    pub fn correlation(inner: R, id: Option<CorrelationId>) -> Self {
        Self {
            inner,
            layer: Layer::Correlation(id),
        }
    }

    /// Bind the tenant computed by `extractor` from the input and context
    pub fn tenant<F>(inner: R, extractor: F) -> Self
    where
        F: Fn(&I, &AmbientContext) -> TenantId + Send + Sync + 'static,
    {
        Self {
            inner,
            layer: Layer::Tenant(Arc::new(extractor)),
        }
    }

    /// Bind a user id
    pub fn user(inner: R, id: UserId) -> Self {
        Self {
            inner,
            layer: Layer::User(id),
        }
    }

    fn layered(&self, ctx: &AmbientContext, input: &I) -> AmbientContext {
        match &self.layer {
            Layer::Value { key, value } => ctx.with_shared_value(Arc::clone(key), Arc::clone(value)),
            Layer::Correlation(Some(id)) => ctx.with_correlation_id(id.clone()),
            Layer::Correlation(None) if ctx.correlation_id().is_some() => ctx.clone(),
            Layer::Correlation(None) => {
                let id = CorrelationId::generate();
                tracing::trace!(correlation_id = %id, "generated correlation id");
                ctx.with_correlation_id(id)
            }
            Layer::Tenant(extract) => ctx.with_tenant(extract(input, ctx)),
            Layer::User(id) => ctx.with_user(id.clone()),
        }
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for WithContext<R, I>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let ctx = self.layered(ctx, &input);
        self.inner.invoke(&ctx, input)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let ctx = self.layered(ctx, &input);
        self.inner.invoke_async(&ctx, input).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
