//! Conduit
//!
//! Resilient, observable pipelines built from runnables: values that can be
//! invoked both blocking and suspending with the same contract. Decorators
//! add one concern each and stack freely.
//!
//! ```ignore
//! use conduit::prelude::*;
//!
//! let lookup = FnRunnable::from_fn(|id: u64| Ok(id * 2))
//!     .named("lookup")
//!     .cached(EvictionPolicy::ttl(Duration::from_secs(30)))
//!     .retry(RetryPolicy::new(3)?)
//!     .fallback_value(0);
//!
//! let value = lookup.invoke(&AmbientContext::new(), 21)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use conduit_core::{AmbientContext, ConduitError, ConduitResult, CorrelationId, TenantId, UserId};
pub use conduit_runtime::{BoxRunnable, FnRunnable, Runnable};

/// Everything needed to build and run a pipeline
pub mod prelude {
    pub use conduit_cache::{CacheConfig, CacheExt, CacheStats, ContextScope, EvictionPolicy};
    pub use conduit_core::{
        AmbientContext, ConduitError, ConduitResult, CorrelationId, TenantId, UserId,
    };
    pub use conduit_resilience::{
        Backoff, FallbackScope, ResilienceExt, RetryConfig, RetryPolicy, SyncBackoff,
        TimeoutConfig,
    };
    pub use conduit_runtime::{
        BoxRunnable, BranchRouter, Constant, FnRunnable, Metrics, MetricsCollector, Runnable,
        RunnableExt, TelemetryRecord,
    };
    pub use std::time::Duration;
    pub use tokio_util::sync::CancellationToken;
}
