//! Conduit Cache
//!
//! Memoization for runnables. Outputs are stored per context scope and
//! input with at most one in-flight computation per key. Unrelated keys
//! never wait on each other. Entries leave through TTL expiry, LRU eviction,
//! or both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod policy;
pub mod key;
pub mod store;
pub mod stats;
pub mod config;
pub mod layer;

pub use policy::EvictionPolicy;
pub use key::{CacheKey, ContextScope, InputKey};
pub use store::CacheStore;
pub use stats::CacheStats;
pub use config::CacheConfig;
pub use layer::{CacheExt, Cached};
