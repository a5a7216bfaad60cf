//! Fallback to a substitute runnable.

use std::any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult};
use conduit_runtime::Runnable;

type ErrorPredicate = Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>;

/// Which failures engage the substitute
///
/// Missing sync implementations, cancellations and configuration errors
/// always pass through, whatever the scope.
#[derive(Clone, Default)]
pub enum FallbackScope {
    /// Every other failure
    #[default]
    Any,
    /// Invocation failures whose error is of one concrete type
    Kind {
        /// Type name, for diagnostics
        type_name: &'static str,
        /// Type test
        matches: fn(&ConduitError) -> bool,
    },
    /// Failures accepted by a caller-supplied function
    Predicate(ErrorPredicate),
}

impl FallbackScope {
    /// Scope to invocation failures of type `E`
    #[must_use]
    pub fn kind<E>() -> Self
    where
        E: StdError + 'static,
    {
        Self::Kind {
            type_name: any::type_name::<E>(),
            matches: ConduitError::is::<E>,
        }
    }

    /// Scope to failures accepted by `predicate`
    pub fn predicate<P>(predicate: P) -> Self
    where
        P: Fn(&ConduitError) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Whether the substitute should handle `err`
    #[must_use]
    pub fn catches(&self, err: &ConduitError) -> bool {
        if err.is_fatal() {
            return false;
        }
        match self {
            Self::Any => true,
            Self::Kind { matches, .. } => matches(err),
            Self::Predicate(predicate) => predicate(err),
        }
    }
}

impl fmt::Debug for FallbackScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Kind { type_name, .. } => write!(f, "Kind({type_name})"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Runs `substitute` with the same input when `primary` fails within scope
pub struct Fallback<P, S> {
    primary: P,
    substitute: S,
    scope: FallbackScope,
}

impl<P, S> Fallback<P, S> {
    /// Catch every non-fatal failure
    pub fn new(primary: P, substitute: S) -> Self {
        Self::scoped(primary, substitute, FallbackScope::Any)
    }

    /// Catch only failures within `scope`
    pub fn scoped(primary: P, substitute: S, scope: FallbackScope) -> Self {
        Self {
            primary,
            substitute,
            scope,
        }
    }

    /// Scope in force
    #[must_use]
    pub fn scope(&self) -> &FallbackScope {
        &self.scope
    }
}

#[async_trait]
impl<I, O, P, S> Runnable<I, O> for Fallback<P, S>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    P: Runnable<I, O>,
    S: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        match self.primary.invoke(ctx, input.clone()) {
            Err(err) if self.scope.catches(&err) => {
                tracing::debug!(operation = self.primary.name(), error = %err, "fallback engaged");
                self.substitute.invoke(ctx, input)
            }
            result => result,
        }
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        match self.primary.invoke_async(ctx, input.clone()).await {
            Err(err) if self.scope.catches(&err) => {
                tracing::debug!(operation = self.primary.name(), error = %err, "fallback engaged");
                self.substitute.invoke_async(ctx, input).await
            }
            result => result,
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}
