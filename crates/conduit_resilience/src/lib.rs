//! Conduit Resilience
//!
//! Decorators that shape failure: bounded retry with backoff, fallback to a
//! substitute runnable, deadlines, and cooperative cancellation. Each wraps
//! any runnable and is itself a runnable, so they stack in any order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod retry;
pub mod fallback;
pub mod timeout;
pub mod cancel;
pub mod config;
pub mod ext;

pub use backoff::Backoff;
pub use retry::{Retry, RetryPolicy, SyncBackoff};
pub use fallback::{Fallback, FallbackScope};
pub use timeout::Timeout;
pub use cancel::Cancellable;
pub use config::{BackoffConfig, RetryConfig, TimeoutConfig};
pub use ext::ResilienceExt;
