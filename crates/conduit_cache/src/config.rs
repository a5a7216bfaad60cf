//! Cache configuration.

use std::time::Duration;

use conduit_core::{ConduitError, ConduitResult};
use serde::{Deserialize, Serialize};

use crate::policy::EvictionPolicy;

/// Declarative cache options
///
/// Both bounds are optional; omitting both yields an unbounded cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Time to live in milliseconds
    pub ttl_ms: Option<u64>,
    /// Maximum live entries
    pub max_size: Option<usize>,
}

impl CacheConfig {
    /// Create a new cache config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the capacity bound
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> ConduitResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve into an eviction policy
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `max_size` is zero.
    pub fn policy(&self) -> ConduitResult<EvictionPolicy> {
        let ttl = self.ttl_ms.map(Duration::from_millis);
        match (ttl, self.max_size) {
            (None, None) => Ok(EvictionPolicy::None),
            (Some(ttl), None) => Ok(EvictionPolicy::ttl(ttl)),
            (None, Some(max)) => EvictionPolicy::lru(max),
            (Some(ttl), Some(max)) => EvictionPolicy::ttl_lru(ttl, max),
        }
    }
}

impl TryFrom<CacheConfig> for EvictionPolicy {
    type Error = ConduitError;

    fn try_from(config: CacheConfig) -> ConduitResult<Self> {
        config.policy()
    }
}
