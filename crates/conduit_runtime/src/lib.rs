//! Conduit Runtime
//!
//! The dual blocking/async execution contract and the structural decorators
//! built on it: combinators, branch routing, context binding and telemetry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod runnable;
pub mod combinator;
pub mod branch;
pub mod scope;
pub mod monitor;
pub mod ext;

pub use runnable::{BoxRunnable, Constant, FnRunnable, Runnable};
pub use combinator::{Filter, Map, MapWithInput, Pipe, Tap};
pub use branch::{BranchRouter, Predicate, Route};
pub use scope::WithContext;
pub use monitor::{Metrics, MetricsCollector, Telemetry, TelemetryObserver, TelemetryRecord};
pub use ext::RunnableExt;
