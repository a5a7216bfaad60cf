//! Ambient context threaded through every runnable boundary.
//!
//! An [`AmbientContext`] is an immutable chain of frames. Layering a binding
//! pushes a new frame in front of the existing chain and returns a new
//! context; the parent is shared, never mutated. Lookups walk from the newest
//! frame so the nearest binding wins.
//!
//! There is no process-wide "current" context. Each call chain owns its
//! context value and hands it down explicitly, so concurrent chains cannot
//! observe or clobber each other's bindings.

use std::any::Any;
use std::fmt;
use std::iter;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::id::{CorrelationId, TenantId, UserId};

/// Well-known context keys
pub mod keys {
    /// Key under which the correlation id is reported
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Key under which the tenant id is reported
    pub const TENANT_ID: &str = "tenant_id";
    /// Key under which the user id is reported
    pub const USER_ID: &str = "user_id";
}

enum Binding {
    Correlation(CorrelationId),
    Tenant(TenantId),
    User(UserId),
    Value {
        key: Arc<str>,
        value: Arc<dyn Any + Send + Sync>,
    },
    Cancellation(CancellationToken),
}

impl Binding {
    fn key(&self) -> Option<&str> {
        match self {
            Self::Correlation(_) => Some(keys::CORRELATION_ID),
            Self::Tenant(_) => Some(keys::TENANT_ID),
            Self::User(_) => Some(keys::USER_ID),
            Self::Value { key, .. } => Some(key.as_ref()),
            Self::Cancellation(_) => None,
        }
    }
}

struct Frame {
    binding: Binding,
    parent: Option<Arc<Frame>>,
}

/// Per-call-chain metadata visible to every stage
#[derive(Clone, Default)]
pub struct AmbientContext {
    head: Option<Arc<Frame>>,
    depth: usize,
}

impl AmbientContext {
    /// Create an empty root context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root context with a freshly generated correlation id
    #[must_use]
    pub fn with_generated_correlation() -> Self {
        Self::new().with_correlation_id(CorrelationId::generate())
    }

    fn push(&self, binding: Binding) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                binding,
                parent: self.head.clone(),
            })),
            depth: self.depth + 1,
        }
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        iter::successors(self.head.as_deref(), |frame| frame.parent.as_deref())
    }

    /// Layer a correlation id
    #[must_use]
    pub fn with_correlation_id(&self, id: CorrelationId) -> Self {
        self.push(Binding::Correlation(id))
    }

    /// Layer a tenant id
    #[must_use]
    pub fn with_tenant(&self, id: TenantId) -> Self {
        self.push(Binding::Tenant(id))
    }

    /// Layer a user id
    #[must_use]
    pub fn with_user(&self, id: UserId) -> Self {
        self.push(Binding::User(id))
    }

    /// Layer an arbitrary key/value pair
    #[must_use]
    pub fn with_value<T>(&self, key: impl Into<Arc<str>>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.with_shared_value(key, Arc::new(value))
    }

    /// Layer an already shared value without copying it
    #[must_use]
    pub fn with_shared_value(
        &self,
        key: impl Into<Arc<str>>,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        self.push(Binding::Value {
            key: key.into(),
            value,
        })
    }

    /// Attach the cancellation token of an async call
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        self.push(Binding::Cancellation(token))
    }

    /// Nearest correlation id
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.frames().find_map(|frame| match &frame.binding {
            Binding::Correlation(id) => Some(id),
            _ => None,
        })
    }

    /// Nearest tenant id
    #[must_use]
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.frames().find_map(|frame| match &frame.binding {
            Binding::Tenant(id) => Some(id),
            _ => None,
        })
    }

    /// Nearest user id
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.frames().find_map(|frame| match &frame.binding {
            Binding::User(id) => Some(id),
            _ => None,
        })
    }

    /// Nearest cancellation token
    #[must_use]
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.frames().find_map(|frame| match &frame.binding {
            Binding::Cancellation(token) => Some(token),
            _ => None,
        })
    }

    /// Whether the nearest cancellation token has fired
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation().is_some_and(CancellationToken::is_cancelled)
    }

    /// Nearest custom value bound under `key`
    ///
    /// Returns `None` when the nearest binding under `key` holds a different
    /// type; an outer binding of the right type stays shadowed.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.get_raw(key)?.downcast_ref::<T>()
    }

    /// Nearest custom value bound under `key`, untyped
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.frames().find_map(|frame| match &frame.binding {
            Binding::Value { key: k, value } if k.as_ref() == key => Some(value.as_ref()),
            _ => None,
        })
    }

    /// Whether anything is bound under `key`, well-known keys included
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.frames().any(|frame| frame.binding.key() == Some(key))
    }

    /// Distinct bound keys, newest first
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for key in self.frames().filter_map(|frame| frame.binding.key()) {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }

    /// Number of layered frames
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Whether no bindings exist
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.depth == 0
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("correlation_id", &self.correlation_id())
            .field("tenant_id", &self.tenant_id())
            .field("user_id", &self.user_id())
            .field("keys", &self.keys())
            .field("depth", &self.depth)
            .finish()
    }
}
