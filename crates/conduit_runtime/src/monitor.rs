//! Invocation telemetry and aggregate metrics.
//!
//! [`Telemetry`] emits exactly one [`TelemetryRecord`] per call to its
//! observer. Observers see the outcome but cannot change it: a panicking
//! observer is caught and logged. [`MetricsCollector`] is an observer that
//! folds records into lock-free counters.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conduit_core::{AmbientContext, ConduitError, ConduitResult, Timestamp};
use serde::Serialize;

use crate::runnable::Runnable;

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    /// Operation name
    pub operation: String,
    /// Wall-clock start (metadata only)
    pub started_at: Timestamp,
    /// Monotonic elapsed time
    pub duration: Duration,
    /// Whether the call succeeded
    pub success: bool,
    /// Failure, when `success` is false
    pub error: Option<ConduitError>,
}

impl TelemetryRecord {
    fn from_result<O>(
        operation: &str,
        started_at: Timestamp,
        duration: Duration,
        result: &ConduitResult<O>,
    ) -> Self {
        Self {
            operation: operation.to_string(),
            started_at,
            duration,
            success: result.is_ok(),
            error: result.as_ref().err().cloned(),
        }
    }
}

/// Receives telemetry records
pub trait TelemetryObserver: Send + Sync {
    /// Called once per invocation
    fn record(&self, record: &TelemetryRecord);
}

impl<F> TelemetryObserver for F
where
    F: Fn(&TelemetryRecord) + Send + Sync,
{
    fn record(&self, record: &TelemetryRecord) {
        self(record);
    }
}

fn deliver(observer: &dyn TelemetryObserver, record: &TelemetryRecord) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.record(record)));
    if outcome.is_err() {
        tracing::error!(operation = %record.operation, "telemetry observer panicked");
    }
}

/// Reports every invocation of the wrapped runnable
pub struct Telemetry<R> {
    inner: R,
    operation: Arc<str>,
    observer: Arc<dyn TelemetryObserver>,
}

impl<R> Telemetry<R> {
    /// Wrap `inner`, reporting under `operation`
    pub fn new<T>(inner: R, operation: impl Into<Arc<str>>, observer: T) -> Self
    where
        T: TelemetryObserver + 'static,
    {
        Self::with_shared(inner, operation, Arc::new(observer))
    }

    /// Wrap `inner` with an already shared observer
    pub fn with_shared(
        inner: R,
        operation: impl Into<Arc<str>>,
        observer: Arc<dyn TelemetryObserver>,
    ) -> Self {
        Self {
            inner,
            operation: operation.into(),
            observer,
        }
    }
}

/// Emits a `Cancelled` record if the async call is dropped before finishing
struct InFlight<'a> {
    operation: &'a str,
    observer: &'a dyn TelemetryObserver,
    started_at: Timestamp,
    start: Instant,
    armed: bool,
}

impl InFlight<'_> {
    fn finish<O>(mut self, result: &ConduitResult<O>) {
        self.armed = false;
        let record = TelemetryRecord::from_result(
            self.operation,
            self.started_at,
            self.start.elapsed(),
            result,
        );
        deliver(self.observer, &record);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(operation = self.operation, "invocation dropped before completion");
            let record = TelemetryRecord {
                operation: self.operation.to_string(),
                started_at: self.started_at,
                duration: self.start.elapsed(),
                success: false,
                error: Some(ConduitError::Cancelled),
            };
            deliver(self.observer, &record);
        }
    }
}

#[async_trait]
impl<I, O, R> Runnable<I, O> for Telemetry<R>
where
    I: Send + 'static,
    O: Send + 'static,
    R: Runnable<I, O>,
{
    fn invoke(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let started_at = Timestamp::now();
        let start = Instant::now();
        let result = self.inner.invoke(ctx, input);
        let record =
            TelemetryRecord::from_result(&self.operation, started_at, start.elapsed(), &result);
        deliver(self.observer.as_ref(), &record);
        result
    }

    async fn invoke_async(&self, ctx: &AmbientContext, input: I) -> ConduitResult<O> {
        let guard = InFlight {
            operation: &self.operation,
            observer: self.observer.as_ref(),
            started_at: Timestamp::now(),
            start: Instant::now(),
            armed: true,
        };
        let result = self.inner.invoke_async(ctx, input).await;
        guard.finish(&result);
        result
    }

    fn name(&self) -> &str {
        &self.operation
    }
}

#[derive(Debug)]
struct Counters {
    success: AtomicU64,
    failure: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
        }
    }
}

/// Aggregates invocation counts and durations
///
/// Clones share the same counters, so one collector can be handed to several
/// decorated runnables and read from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
}

impl MetricsCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the counters
    ///
    /// Durations land before the outcome count, so a snapshot that sees the
    /// count also sees a minimum for it.
    pub fn observe(&self, record: &TelemetryRecord) {
        let c = &self.counters;
        let nanos = u64::try_from(record.duration.as_nanos()).unwrap_or(u64::MAX);
        c.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        c.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        c.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        let outcome = if record.success { &c.success } else { &c.failure };
        outcome.fetch_add(1, Ordering::Release);
    }

    /// Point-in-time view of the counters
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        let c = &self.counters;
        let success = c.success.load(Ordering::Acquire);
        let failure = c.failure.load(Ordering::Acquire);
        let total = success + failure;
        let total_nanos = c.total_nanos.load(Ordering::Relaxed);
        let min_nanos = c.min_nanos.load(Ordering::Relaxed);

        Metrics {
            total,
            success,
            failure,
            min_duration: if total == 0 || min_nanos == u64::MAX {
                Duration::ZERO
            } else {
                Duration::from_nanos(min_nanos)
            },
            avg_duration: if total == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total_nanos / total)
            },
            max_duration: Duration::from_nanos(c.max_nanos.load(Ordering::Relaxed)),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        let c = &self.counters;
        c.success.store(0, Ordering::Relaxed);
        c.failure.store(0, Ordering::Relaxed);
        c.total_nanos.store(0, Ordering::Relaxed);
        c.min_nanos.store(u64::MAX, Ordering::Relaxed);
        c.max_nanos.store(0, Ordering::Relaxed);
    }
}

impl TelemetryObserver for MetricsCollector {
    fn record(&self, record: &TelemetryRecord) {
        self.observe(record);
    }
}

/// Snapshot of a [`MetricsCollector`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    /// Recorded invocations
    pub total: u64,
    /// Successful invocations
    pub success: u64,
    /// Failed invocations
    pub failure: u64,
    /// Shortest duration seen
    pub min_duration: Duration,
    /// Mean duration
    pub avg_duration: Duration,
    /// Longest duration seen
    pub max_duration: Duration,
}

impl Metrics {
    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.success as f64 / self.total as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failure as f64 / self.total as f64
    }
}
