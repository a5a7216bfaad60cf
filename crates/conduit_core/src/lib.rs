//! Conduit Core Types
//!
//! This crate contains the pure types shared by every pipeline stage:
//! the failure taxonomy, call-chain identifiers, the layered ambient
//! context, and wall-clock timestamps. Nothing here performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod id;
pub mod time;

// Re-exports
pub use context::{AmbientContext, keys};
pub use error::{ConduitError, ConduitResult, InvocationFailure};
pub use id::{CorrelationId, TenantId, UserId};
pub use time::Timestamp;
