//! Eviction policies.

use std::num::NonZeroUsize;
use std::time::Duration;

use conduit_core::{ConduitError, ConduitResult};

/// How entries leave the cache
///
/// TTL is checked on read; an expired entry is dropped and recomputed. The
/// LRU bound is enforced on insert by evicting the least recently accessed
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Entries live for the lifetime of the cache
    #[default]
    None,
    /// Entries expire a fixed time after insertion
    Ttl(Duration),
    /// At most `capacity` live entries
    Lru(NonZeroUsize),
    /// Both bounds; TTL is checked first
    TtlLru {
        /// Time to live
        ttl: Duration,
        /// Maximum live entries
        capacity: NonZeroUsize,
    },
}

fn non_zero(capacity: usize) -> ConduitResult<NonZeroUsize> {
    NonZeroUsize::new(capacity)
        .ok_or_else(|| ConduitError::configuration("max_size", "capacity must be at least 1"))
}

impl EvictionPolicy {
    /// TTL-only policy
    #[must_use]
    pub const fn ttl(ttl: Duration) -> Self {
        Self::Ttl(ttl)
    }

    /// LRU-only policy
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `capacity` is zero.
    pub fn lru(capacity: usize) -> ConduitResult<Self> {
        Ok(Self::Lru(non_zero(capacity)?))
    }

    /// Combined TTL and LRU policy
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `capacity` is zero.
    pub fn ttl_lru(ttl: Duration, capacity: usize) -> ConduitResult<Self> {
        Ok(Self::TtlLru {
            ttl,
            capacity: non_zero(capacity)?,
        })
    }

    /// Time to live, if bounded
    #[must_use]
    pub const fn time_to_live(&self) -> Option<Duration> {
        match self {
            Self::Ttl(ttl) | Self::TtlLru { ttl, .. } => Some(*ttl),
            Self::None | Self::Lru(_) => None,
        }
    }

    /// Capacity, if bounded
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        match self {
            Self::Lru(capacity) | Self::TtlLru { capacity, .. } => Some(capacity.get()),
            Self::None | Self::Ttl(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_bounds() {
        assert_eq!(EvictionPolicy::None.capacity(), None);
        assert_eq!(EvictionPolicy::None.time_to_live(), None);

        let p = EvictionPolicy::ttl_lru(Duration::from_secs(1), 3).unwrap();
        assert_eq!(p.capacity(), Some(3));
        assert_eq!(p.time_to_live(), Some(Duration::from_secs(1)));
        assert_eq!(EvictionPolicy::lru(2).unwrap().time_to_live(), None);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = EvictionPolicy::lru(0).unwrap_err();
        assert!(matches!(err, ConduitError::Configuration { ref field, .. } if field == "max_size"));
        assert!(EvictionPolicy::ttl_lru(Duration::from_secs(1), 0).is_err());
    }
}
