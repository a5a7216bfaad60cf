//! Structural combinators: map, tap, filter and pipe.
//!
//! Each combinator owns the runnable it wraps and delegates both execution
//! paths to it, inserting its own step before or after the delegated call.
//! Failures from the wrapped runnable pass through untouched.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitResult};

use crate::runnable::Runnable;

type Mapper<O, O2> = Arc<dyn Fn(O, &AmbientContext) -> O2 + Send + Sync>;
type InputMapper<I, O, O2> = Arc<dyn Fn(&I, O, &AmbientContext) -> O2 + Send + Sync>;
type Observer<O> = Arc<dyn Fn(&O, &AmbientContext) -> ConduitResult<()> + Send + Sync>;
type Predicate<I> = Arc<dyn Fn(&I, &AmbientContext) -> ConduitResult<bool> + Send + Sync>;

/// Transforms the output of the wrapped runnable
pub struct Map<R, O, O2> {
    inner: R,
    mapper: Mapper<O, O2>,
}

impl<R, O, O2> Map<R, O, O2> {
    /// Wrap `inner` with a context-aware mapper
    pub fn new<F>(inner: R, mapper: F) -> Self
    where
        F: Fn(O, &AmbientContext) -> O2 + Send + Sync + 'static,
    {
        Self {
            inner,
            mapper: Arc::new(mapper),
        }
    }
}

#[async_trait]
impl<I, O, O2, R> Runnable<I, O2> for Map<R, O, O2>
where
    I: Send + 'static,
    O: Send + 'static,
    O2: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O2> {
        let output = self.inner.invoke(ctx, input)?;
        Ok((self.mapper)(output, ctx))
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O2> {
        let output = self.inner.invoke_async(ctx, input).await?;
        Ok((self.mapper)(output, ctx))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Transforms the output with access to the original input
pub struct MapWithInput<R, I, O, O2> {
    inner: R,
    mapper: InputMapper<I, O, O2>,
}

impl<R, I, O, O2> MapWithInput<R, I, O, O2> {
    /// Wrap `inner` with an input-and-context-aware mapper
    pub fn new<F>(inner: R, mapper: F) -> Self
    where
        F: Fn(&I, O, &AmbientContext) -> O2 + Send + Sync + 'static,
    {
        Self {
            inner,
            mapper: Arc::new(mapper),
        }
    }
}

#[async_trait]
impl<I, O, O2, R> Runnable<I, O2> for MapWithInput<R, I, O, O2>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    O2: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O2> {
        let kept = input.clone();
        let output = self.inner.invoke(ctx, input)?;
        Ok((self.mapper)(&kept, output, ctx))
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O2> {
        let kept = input.clone();
        let output = self.inner.invoke_async(ctx, input).await?;
        Ok((self.mapper)(&kept, output, ctx))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Runs a side effect on the output and passes it through unchanged
///
/// A failure returned by the observer replaces the output.
pub struct Tap<R, O> {
    inner: R,
    observer: Observer<O>,
}

impl<R, O> Tap<R, O> {
    /// Wrap `inner` with a context-aware observer
    pub fn new<F>(inner: R, observer: F) -> Self
    where
        F: Fn(&O, &AmbientContext) -> ConduitResult<()> + Send + Sync + 'static,
    {
        Self {
            inner,
            observer: Arc::new(observer),
        }
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Tap<R, O>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let output = self.inner.invoke(ctx, input)?;
        (self.observer)(&output, ctx)?;
        Ok(output)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let output = self.inner.invoke_async(ctx, input).await?;
        (self.observer)(&output, ctx)?;
        Ok(output)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Skips the wrapped runnable when the predicate rejects the input
///
/// Rejection returns the configured default and is not a failure. A
/// predicate that itself fails propagates that failure.
pub struct Filter<R, I, O> {
    inner: R,
    predicate: Predicate<I>,
    default: O,
}

impl<R, I, O> Filter<R, I, O> {
    /// Wrap `inner` with a fallible, context-aware predicate
    pub fn new<P>(inner: R, predicate: P, default: O) -> Self
    where
        P: Fn(&I, &AmbientContext) -> ConduitResult<bool> + Send + Sync + 'static,
    {
        Self {
            inner,
            predicate: Arc::new(predicate),
            default,
        }
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Filter<R, I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        if (self.predicate)(&input, ctx)? {
            self.inner.invoke(ctx, input)
        } else {
            tracing::trace!(operation = self.inner.name(), "input filtered out");
            Ok(self.default.clone())
        }
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        if (self.predicate)(&input, ctx)? {
            self.inner.invoke_async(ctx, input).await
        } else {
            tracing::trace!(operation = self.inner.name(), "input filtered out");
            Ok(self.default.clone())
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Sequential composition: the output of `first` feeds `next`
pub struct Pipe<A, B, M> {
    first: A,
    next: B,
    _intermediate: PhantomData<fn() -> M>,
}

impl<A, B, M> Pipe<A, B, M> {
    /// Compose two runnables
    pub fn new(first: A, next: B) -> Self {
        Self {
            first,
            next,
            _intermediate: PhantomData,
        }
    }
}

#[async_trait]
impl<I, M, O, A, B> Runnable<I, O> for Pipe<A, B, M>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
    A: Runnable<I, M>,
    B: Runnable<M, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let intermediate = self.first.invoke(ctx, input)?;
        self.next.invoke(ctx, intermediate)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let intermediate = self.first.invoke_async(ctx, input).await?;
        self.next.invoke_async(ctx, intermediate).await
    }

    fn name(&self) -> &str {
        self.first.name()
    }
}
