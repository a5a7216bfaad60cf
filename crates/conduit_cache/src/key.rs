//! Cache keys.
//!
//! A key is a context scope plus an input part. The scope isolates tenants,
//! users or call chains inside one cache; the input part is either the input
//! itself, compared exactly, or a caller-selected string.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use conduit_core::{AmbientContext, CorrelationId, TenantId, UserId};

/// Input half of a [`CacheKey`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputKey<I> {
    /// The input value
    Value(I),
    /// A string chosen by an input key selector
    Selected(String),
}

/// Key under which one cached output is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey<I> {
    /// Context-derived prefix, empty for the global scope
    pub scope: String,
    /// Input-derived part
    pub input: InputKey<I>,
}

impl<I> CacheKey<I> {
    /// Create a key
    #[must_use]
    pub fn new(scope: impl Into<String>, input: InputKey<I>) -> Self {
        Self {
            scope: scope.into(),
            input,
        }
    }
}

type CustomScope = Arc<dyn Fn(&AmbientContext) -> String + Send + Sync>;

/// Which part of the ambient context prefixes cache keys
#[derive(Clone, Default)]
pub enum ContextScope {
    /// One scope for every caller
    #[default]
    Global,
    /// Per tenant
    Tenant,
    /// Per user
    User,
    /// Per tenant and user
    TenantUser,
    /// Per call chain
    Correlation,
    /// Caller-defined
    Custom(CustomScope),
}

impl ContextScope {
    /// Caller-defined scope selector
    pub fn custom<F>(selector: F) -> Self
    where
        F: Fn(&AmbientContext) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(selector))
    }

    /// Compute the key prefix for `ctx`
    ///
    /// A missing identifier resolves to an empty segment, so callers without
    /// a tenant share one scope rather than failing.
    #[must_use]
    pub fn resolve(&self, ctx: &AmbientContext) -> String {
        match self {
            Self::Global => String::new(),
            Self::Tenant => format!(
                "tenant:{}",
                ctx.tenant_id().map_or("", TenantId::as_str)
            ),
            Self::User => format!("user:{}", ctx.user_id().map_or("", UserId::as_str)),
            Self::TenantUser => format!(
                "tenant:{}/user:{}",
                ctx.tenant_id().map_or("", TenantId::as_str),
                ctx.user_id().map_or("", UserId::as_str)
            ),
            Self::Correlation => format!(
                "corr:{}",
                ctx.correlation_id().map_or("", CorrelationId::as_str)
            ),
            Self::Custom(selector) => selector(ctx),
        }
    }
}

impl fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("Global"),
            Self::Tenant => f.write_str("Tenant"),
            Self::User => f.write_str("User"),
            Self::TenantUser => f.write_str("TenantUser"),
            Self::Correlation => f.write_str("Correlation"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_isolate_tenants() {
        let acme = AmbientContext::new().with_tenant(TenantId::new("acme"));
        let globex = AmbientContext::new().with_tenant(TenantId::new("globex"));

        assert_ne!(
            ContextScope::Tenant.resolve(&acme),
            ContextScope::Tenant.resolve(&globex)
        );
        assert_eq!(
            ContextScope::Global.resolve(&acme),
            ContextScope::Global.resolve(&globex)
        );
    }

    #[test]
    fn test_tenant_user_scope() {
        let ctx = AmbientContext::new()
            .with_tenant(TenantId::new("acme"))
            .with_user(UserId::new("alice"));
        assert_eq!(ContextScope::TenantUser.resolve(&ctx), "tenant:acme/user:alice");
        assert_eq!(ContextScope::User.resolve(&AmbientContext::new()), "user:");
    }

    #[test]
    fn test_custom_scope() {
        let scope = ContextScope::custom(|ctx| {
            ctx.get::<String>("region").cloned().unwrap_or_default()
        });
        let ctx = AmbientContext::new().with_value("region", "eu".to_string());
        assert_eq!(scope.resolve(&ctx), "eu");
    }

    #[test]
    fn test_keys_compare_exactly() {
        let a = CacheKey::new("", InputKey::Value((1, "x")));
        let b = CacheKey::new("", InputKey::Value((1, "x")));
        let c = CacheKey::new("tenant:acme", InputKey::Value((1, "x")));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            CacheKey::<u8>::new("", InputKey::Selected("1".into())),
            CacheKey::new("", InputKey::Value(1))
        );
    }
}
