//! Failure taxonomy for conduit pipelines.
//!
//! Decorators are transparent to failures: a [`ConduitError`] passes through
//! every layer unchanged unless that layer exists to intercept it (retry,
//! fallback). Filter rejection is not represented here because it is not a
//! failure.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result type used by every runnable
pub type ConduitResult<T> = Result<T, ConduitError>;

/// A wrapped computation's own failure.
///
/// The concrete error type is preserved behind an `Arc` so the failure can be
/// cloned into telemetry records and inspected by typed fallback or retry
/// scopes via [`InvocationFailure::downcast_ref`].
#[derive(Clone)]
pub struct InvocationFailure(Arc<dyn StdError + Send + Sync + 'static>);

impl InvocationFailure {
    /// Wrap a concrete error
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Wrap a plain message
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Check whether the underlying error is of type `E`
    #[must_use]
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    /// Borrow the underlying error as `E`, if it is one
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Borrow the underlying error
    #[must_use]
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Whether two handles point at the same failure instance
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for InvocationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Error produced by [`InvocationFailure::msg`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Message(pub String);

/// Conduit error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConduitError {
    /// The wrapped computation failed
    #[error("Invocation failed: {0}")]
    Invocation(InvocationFailure),

    /// `invoke` was called on a runnable that only supports async execution
    #[error("Synchronous execution unsupported for {operation}; call {entry_point} instead")]
    UnsupportedSyncExecution {
        /// Operation that was invoked
        operation: String,
        /// The entry point that must be used instead
        entry_point: &'static str,
    },

    /// The async deadline elapsed
    #[error("Timeout after {after:?}: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// The configured deadline
        after: Duration,
    },

    /// The async call was cancelled by its caller
    #[error("Operation cancelled")]
    Cancelled,

    /// A decorator was configured with invalid options
    #[error("Invalid configuration for {field}: {reason}")]
    Configuration {
        /// Offending option
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConduitError {
    /// Wrap a concrete error as an invocation failure
    #[must_use]
    pub fn invocation<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Invocation(InvocationFailure::new(error))
    }

    /// Invocation failure carrying only a message
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Invocation(InvocationFailure::msg(message))
    }

    /// Unsupported synchronous execution of `operation`
    #[must_use]
    pub fn unsupported_sync(operation: impl Into<String>) -> Self {
        Self::UnsupportedSyncExecution {
            operation: operation.into(),
            entry_point: "invoke_async",
        }
    }

    /// Configuration error
    #[must_use]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check whether this is an invocation failure whose error is of type `E`
    #[must_use]
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Borrow the invocation failure as `E`, if it is one
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Invocation(failure) => failure.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Whether this is the wrapped computation's own failure
    #[must_use]
    pub const fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation(_))
    }

    /// Whether this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this is a cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this is an unsupported synchronous call
    #[must_use]
    pub const fn is_unsupported_sync(&self) -> bool {
        matches!(self, Self::UnsupportedSyncExecution { .. })
    }

    /// Failures that end the call outright and are never retried or
    /// substituted: a missing sync implementation, or a caller abort.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedSyncExecution { .. } | Self::Cancelled | Self::Configuration { .. }
        )
    }

    /// Short, stable label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Invocation(_) => "invocation",
            Self::UnsupportedSyncExecution { .. } => "unsupported_sync",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl From<serde_json::Error> for ConduitError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration("json", err.to_string())
    }
}
