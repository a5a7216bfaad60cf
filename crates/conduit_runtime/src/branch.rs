//! First-match branch routing.
//!
//! A [`BranchRouter`] holds an ordered route table and a default target.
//! Each call scans the table in declaration order, evaluating one predicate
//! at a time, and dispatches to the target of the first predicate that holds.
//! Later predicates are never evaluated for that call. Predicate and target
//! failures propagate; they never fall through to the next route.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::runnable::{BoxRunnable, Runnable};

type SyncPredicate<I> = Arc<dyn Fn(&I, &AmbientContext) -> ConduitResult<bool> + Send + Sync>;
type AsyncPredicate<I> =
    Arc<dyn Fn(I, AmbientContext) -> BoxFuture<'static, ConduitResult<bool>> + Send + Sync>;

/// Route guard
///
/// Async guards receive a clone of the input and can only be evaluated on
/// the async path.
pub enum Predicate<I> {
    /// Evaluated inline on either path
    Sync(SyncPredicate<I>),
    /// Awaited on the async path; rejected on the blocking path
    Async(AsyncPredicate<I>),
}

impl<I> Clone for Predicate<I> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(p) => Self::Sync(Arc::clone(p)),
            Self::Async(p) => Self::Async(Arc::clone(p)),
        }
    }
}

/// One `(predicate, target)` entry of the route table
pub struct Route<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    predicate: Predicate<I>,
    target: BoxRunnable<I, O>,
}

impl<I, O> Route<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Guard of this route
    #[must_use]
    pub fn predicate(&self) -> &Predicate<I> {
        &self.predicate
    }

    /// Target dispatched when the guard holds
    #[must_use]
    pub fn target(&self) -> &BoxRunnable<I, O> {
        &self.target
    }
}

/// Ordered predicate-to-target dispatch with a default target
pub struct BranchRouter<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: Arc<str>,
    routes: Vec<Route<I, O>>,
    default: BoxRunnable<I, O>,
}

impl<I, O> BranchRouter<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a router whose only target is `default`
    #[must_use]
    pub fn new<R>(default: R) -> Self
    where
        R: Runnable<I, O> + 'static,
    {
        Self {
            name: Arc::from("branch"),
            routes: Vec::new(),
            default: Arc::new(default),
        }
    }

    /// Append a route guarded by a plain predicate on the input
    #[must_use]
    pub fn when<P, R>(self, predicate: P, target: R) -> Self
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
        R: Runnable<I, O> + 'static,
    {
        self.when_context(move |input: &I, _ctx: &AmbientContext| Ok(predicate(input)), target)
    }

    /// Append a route guarded by a fallible, context-aware predicate
    #[must_use]
    pub fn when_context<P, R>(self, predicate: P, target: R) -> Self
    where
        P: Fn(&I, &AmbientContext) -> ConduitResult<bool> + Send + Sync + 'static,
        R: Runnable<I, O> + 'static,
    {
        self.route(Predicate::Sync(Arc::new(predicate)), target)
    }

    /// Append a route guarded by an async predicate
    #[must_use]
    pub fn when_async<P, Fut, R>(self, predicate: P, target: R) -> Self
    where
        P: Fn(I, AmbientContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConduitResult<bool>> + Send + 'static,
        R: Runnable<I, O> + 'static,
    {
        let predicate: AsyncPredicate<I> =
            Arc::new(move |input, ctx| predicate(input, ctx).boxed());
        self.route(Predicate::Async(predicate), target)
    }

    /// Append a prebuilt route
    #[must_use]
    pub fn route<R>(mut self, predicate: Predicate<I>, target: R) -> Self
    where
        R: Runnable<I, O> + 'static,
    {
        self.routes.push(Route {
            predicate,
            target: Arc::new(target),
        });
        self
    }

    /// Set the operation name
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Route table in declaration order
    #[must_use]
    pub fn routes(&self) -> &[Route<I, O>] {
        &self.routes
    }

    /// Number of guarded routes, the default excluded
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether only the default target exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl<I, O> Runnable<I, O> for BranchRouter<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        for (index, route) in self.routes.iter().enumerate() {
            let matched = match &route.predicate {
                Predicate::Sync(p) => p(&input, ctx)?,
                Predicate::Async(_) => {
                    return Err(ConduitError::unsupported_sync(format!(
                        "{}[{}]",
                        self.name, index
                    )));
                }
            };
            if matched {
                tracing::trace!(router = %self.name, route = index, "dispatching");
                return route.target.invoke(ctx, input);
            }
        }
        tracing::trace!(router = %self.name, "dispatching to default");
        self.default.invoke(ctx, input)
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        for (index, route) in self.routes.iter().enumerate() {
            let matched = match &route.predicate {
                Predicate::Sync(p) => p(&input, ctx)?,
                Predicate::Async(p) => p(input.clone(), ctx.clone()).await?,
            };
            if matched {
                tracing::trace!(router = %self.name, route = index, "dispatching");
                return route.target.invoke_async(ctx, input).await;
            }
        }
        tracing::trace!(router = %self.name, "dispatching to default");
        self.default.invoke_async(ctx, input).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
