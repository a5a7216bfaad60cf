//! End-to-end pipelines mixing every decorator family.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use conduit::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("transient")]
struct Transient;

#[derive(Debug, thiserror::Error)]
#[error("permanent")]
struct Permanent;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fails every odd-numbered call with `Transient`
fn alternating_square(calls: &Arc<AtomicU32>) -> FnRunnable<u64, u64> {
    let calls = Arc::clone(calls);
    FnRunnable::from_fn(move |x: u64| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 2 == 1 {
            Err(ConduitError::invocation(Transient))
        } else {
            Ok(x * x)
        }
    })
    .named("square")
}

#[test]
fn test_branch_first_match_only() {
    init_tracing();
    let evaluated = Arc::new(AtomicU32::new(0));
    let second = Arc::clone(&evaluated);
    let router = BranchRouter::new(Constant::new("default"))
        .when(|x: &i32| *x > 0, Constant::new("positive"))
        .when(
            move |x: &i32| {
                second.fetch_add(1, Ordering::SeqCst);
                *x > 1
            },
            Constant::new("greater than one"),
        );

    assert_eq!(router.invoke(&AmbientContext::new(), 5).unwrap(), "positive");
    assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    assert_eq!(router.invoke(&AmbientContext::new(), -5).unwrap(), "default");
    assert_eq!(evaluated.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retry_inside_cache_with_metrics() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let metrics = MetricsCollector::new();
    let pipeline = alternating_square(&calls)
        .retry(RetryPolicy::new(3).unwrap().retry_on::<Transient>())
        .cached(EvictionPolicy::lru(8).unwrap())
        .fallback_value(0)
        .with_metrics(&metrics);
    let ctx = AmbientContext::new();

    assert_eq!(pipeline.invoke(&ctx, 5).unwrap(), 25);
    assert_eq!(pipeline.invoke(&ctx, 5).unwrap(), 25);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.success, 2);
    assert_eq!(pipeline.name(), "square");
}

#[test]
fn test_fallback_scoped_by_kind_through_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let permanent = FnRunnable::from_fn(move |_x: u64| -> ConduitResult<u64> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ConduitError::invocation(Permanent))
    });
    let pipeline = permanent
        .retry(RetryPolicy::new(4).unwrap().retry_on::<Transient>())
        .fallback_on::<Transient, _>(Constant::new(0));

    let err = pipeline.invoke(&AmbientContext::new(), 1).unwrap_err();
    assert!(err.is::<Permanent>());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_async_only_leaf_fails_fast_on_blocking_path() {
    let pipeline = FnRunnable::from_async(|x: u64| async move { Ok(x) })
        .retry(RetryPolicy::new(3).unwrap())
        .fallback_value(7)
        .timeout(Duration::from_millis(5));

    let err = pipeline.invoke(&AmbientContext::new(), 1).unwrap_err();
    assert!(err.is_unsupported_sync());
}

#[tokio::test]
async fn test_sync_async_equivalence() {
    let leaf = FnRunnable::from_parts(
        |x: i64, ctx: &AmbientContext| Ok(x + ctx.get::<i64>("offset").copied().unwrap_or(0)),
        |x: i64, ctx: AmbientContext| async move {
            tokio::task::yield_now().await;
            Ok(x + ctx.get::<i64>("offset").copied().unwrap_or(0))
        },
    );
    let pipeline = leaf
        .map(|x: i64| x * 2)
        .filter(|x: &i64| *x >= 0, -1)
        .with_context("offset", 10i64);
    let ctx = AmbientContext::new();

    for x in [-5, 0, 3, 100] {
        let blocking = pipeline.invoke(&ctx, x).unwrap();
        let suspending = pipeline.invoke_async(&ctx, x).await.unwrap();
        assert_eq!(blocking, suspending, "diverged for input {x}");
    }
    assert_eq!(pipeline.invoke(&ctx, -5).unwrap(), -1);
    assert_eq!(pipeline.invoke(&ctx, 3).unwrap(), 26);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_context_isolation_across_tasks() {
    let pipeline: BoxRunnable<u32, String> =
        FnRunnable::from_async_with_context(|i: u32, ctx: AmbientContext| async move {
            tokio::task::yield_now().await;
            let tenant = ctx.tenant_id().map(|t| t.as_str().to_string()).unwrap_or_default();
            Ok(format!("{i}:{tenant}"))
        })
        .with_tenant(|i: &u32, _ctx: &AmbientContext| TenantId::new(format!("t{i}")))
        .boxed();

    let handles: Vec<_> = (0..32u32)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let ctx = AmbientContext::new();
                pipeline.invoke_async(&ctx, i).await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), format!("{i}:t{i}"));
    }
}

#[test]
fn test_correlation_binding() {
    let pipeline = FnRunnable::from_fn_with_context(|(): (), ctx: &AmbientContext| {
        Ok(ctx.correlation_id().map(|id| id.as_str().to_string()))
    })
    .with_correlation_id(None);

    let first = pipeline.invoke(&AmbientContext::new(), ()).unwrap().unwrap();
    let second = pipeline.invoke(&AmbientContext::new(), ()).unwrap().unwrap();
    assert!(first.starts_with("corr_"));
    assert_ne!(first, second);

    let ctx = AmbientContext::new().with_correlation_id(CorrelationId::new("req-1"));
    assert_eq!(pipeline.invoke(&ctx, ()).unwrap().as_deref(), Some("req-1"));
}

#[test]
fn test_tenant_scoped_cache() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let cached = FnRunnable::from_fn(move |x: u64| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(x + 1)
    })
    .cached(EvictionPolicy::None)
    .with_scope(ContextScope::Tenant);

    let acme = AmbientContext::new().with_tenant(TenantId::new("acme"));
    let globex = AmbientContext::new().with_tenant(TenantId::new("globex"));
    cached.invoke(&acme, 2).unwrap();
    cached.invoke(&globex, 2).unwrap();
    cached.invoke(&acme, 2).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let stats = cached.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 2);
}

#[test]
fn test_pipeline_from_json_config() {
    let retry = RetryConfig::from_json(
        r#"{"max_attempts": 2, "backoff": {"kind": "constant", "delay_ms": 1}}"#,
    )
    .unwrap()
    .policy()
    .unwrap();
    let eviction = CacheConfig::from_json(r#"{"max_size": 1}"#)
        .unwrap()
        .policy()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let cached = alternating_square(&calls).retry(retry).cached(eviction);
    let ctx = AmbientContext::new();

    assert_eq!(cached.invoke(&ctx, 1).unwrap(), 1);
    assert_eq!(cached.invoke(&ctx, 2).unwrap(), 4);
    assert_eq!(cached.invoke(&ctx, 1).unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(cached.stats().evictions, 2);
}

#[tokio::test]
async fn test_telemetry_sees_inner_failure_once() {
    let records: Arc<Mutex<Vec<TelemetryRecord>>> = Arc::default();
    let sink = Arc::clone(&records);
    let failing = FnRunnable::from_fn(|_x: u8| -> ConduitResult<u8> {
        Err(ConduitError::invocation(Permanent))
    })
    .telemetry("lookup", move |record: &TelemetryRecord| {
        if let Ok(mut records) = sink.lock() {
            records.push(record.clone());
        }
    })
    .fallback_value(0);

    assert_eq!(failing.invoke_async(&AmbientContext::new(), 1).await.unwrap(), 0);

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, "lookup");
    assert!(!records[0].success);
    assert!(records[0].error.as_ref().is_some_and(|err| err.is::<Permanent>()));
}

#[tokio::test]
async fn test_timeout_wins_over_idle_token() {
    let slow = FnRunnable::from_async(|x: u32| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(x)
    })
    .timeout(Duration::from_millis(20));

    let err = slow
        .invoke_async_with_cancellation(&AmbientContext::new(), 1, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_cancellation_interrupts_retry_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let failing = FnRunnable::from_fn(move |_x: u32| -> ConduitResult<u32> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ConduitError::invocation(Transient))
    })
    .retry(
        RetryPolicy::new(5)
            .unwrap()
            .with_backoff(Backoff::constant(Duration::from_secs(10))),
    )
    .timeout(Duration::from_secs(30));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = failing
        .invoke_async_with_cancellation(&AmbientContext::new(), 1, token)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}
