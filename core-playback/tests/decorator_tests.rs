//! Tests for the retry, range recovery, fallback and classification decorators.

mod common;

use common::{fail, payload, read_all, serve, status_error, timeout, Script};
use core_playback::datasource::fallback::ActiveSource;
use core_playback::datasource::{
    ErrorClassifyingDataSource, FallbackDataSource, RangeRecoveryDataSource, RetryDataSource,
};
use core_playback::factory::UpstreamFactory;
use core_playback::{
    DataSource, DataSourceFactory, DataSpec, ErrorClass, PlaybackError, RetryPolicy, RetryState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn spec() -> DataSpec {
    DataSpec::new("https://cdn.example.com/track.webm").with_key("track-1")
}

fn millis_between(script: &Script) -> Vec<u128> {
    script
        .calls()
        .windows(2)
        .map(|pair| (pair[1].at - pair[0].at).as_millis())
        .collect()
}

// ============================================================================
// Range recovery
// ============================================================================

/// Fails every ranged open with 416, serves unranged ones.
fn rejects_ranges(data: Vec<u8>) -> Script {
    let full = serve(&data);
    Script::new(Arc::new(move |spec: &DataSpec| {
        if spec.length.is_some() {
            Err(status_error(416))
        } else {
            full(spec)
        }
    }))
}

#[tokio::test]
async fn test_range_recovery_retries_once_without_range() {
    let data = payload(1000);
    let script = rejects_ranges(data.clone());
    let mut source = RangeRecoveryDataSource::new(script.boxed());

    let request = spec()
        .with_range(200, Some(100))
        .with_header("Range", "bytes=200-299");
    let length = source.open(&request).await.unwrap();

    assert_eq!(length, Some(800));
    assert_eq!(read_all(&mut source).await.unwrap(), data[200..].to_vec());
    assert_eq!(source.recoveries(), 1);

    let calls = script.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].length, Some(100));
    assert_eq!(calls[0].range_header.as_deref(), Some("bytes=200-299"));
    assert_eq!(calls[1].length, None);
    assert_eq!(calls[1].range_header, None);
    assert_eq!(calls[1].position, 200);
}

#[tokio::test]
async fn test_range_recovery_on_end_of_stream() {
    let script = Script::new(serve(b"abc")).then(fail(|| PlaybackError::EndOfStream));
    let mut source = RangeRecoveryDataSource::new(script.boxed());

    source.open(&spec().with_range(0, Some(10))).await.unwrap();
    assert_eq!(read_all(&mut source).await.unwrap(), b"abc".to_vec());
    assert_eq!(script.call_count(), 2);
}

#[tokio::test]
async fn test_range_recovery_is_not_recursive() {
    let script = Script::new(fail(|| status_error(416)));
    let mut source = RangeRecoveryDataSource::new(script.boxed());

    let err = source
        .open(&spec().with_range(0, Some(10)))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), Some(416));
    assert_eq!(script.call_count(), 2);
}

#[tokio::test]
async fn test_range_recovery_ignores_other_failures() {
    let script = Script::new(fail(|| status_error(404)));
    let mut source = RangeRecoveryDataSource::new(script.boxed());

    let err = source
        .open(&spec().with_range(0, Some(10)))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), Some(404));
    assert_eq!(script.call_count(), 1);
    assert_eq!(source.recoveries(), 0);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_cap_and_backoff_bounds() {
    let script = Script::new(fail(timeout));
    let policy = RetryPolicy::default();
    let mut source = RetryDataSource::new(script.boxed(), policy.clone());

    let err = source.open(&spec()).await.unwrap_err();

    assert!(matches!(err, PlaybackError::Timeout(_)));
    assert_eq!(script.call_count(), policy.max_retries as usize + 1);
    assert_eq!(source.attempts(), 4);
    assert_eq!(source.state(), RetryState::Fatal);

    let delays = millis_between(&script);
    assert_eq!(delays.len(), 3);
    assert!((1000..1250).contains(&delays[0]), "delay {:?}", delays);
    assert!((2000..2250).contains(&delays[1]), "delay {:?}", delays);
    assert!((4000..4250).contains(&delays[2]), "delay {:?}", delays);
}

#[tokio::test(start_paused = true)]
async fn test_flat_backoff() {
    let script = Script::new(fail(|| status_error(503)));
    let mut source = RetryDataSource::new(script.boxed(), RetryPolicy::flat().with_max_retries(2));

    let err = source.open(&spec()).await.unwrap_err();

    assert_eq!(err.http_status(), Some(503));
    assert_eq!(script.call_count(), 3);
    for delay in millis_between(&script) {
        assert!((2500..2750).contains(&delay), "delay {}", delay);
    }
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_never_retried() {
    let script = Script::new(fail(|| status_error(404)));
    let retry_everything = Arc::new(|_: &PlaybackError| true);
    let mut source =
        RetryDataSource::with_predicate(script.boxed(), RetryPolicy::default(), retry_everything);

    let err = source.open(&spec()).await.unwrap_err();

    assert_eq!(err.http_status(), Some(404));
    assert_eq!(script.call_count(), 1);
    assert_eq!(source.state(), RetryState::Fatal);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_then_success() {
    let script = Script::new(serve(b"media"))
        .then(fail(timeout))
        .then(fail(timeout));
    let mut source = RetryDataSource::new(script.boxed(), RetryPolicy::default());

    let length = source.open(&spec()).await.unwrap();

    assert_eq!(length, Some(5));
    assert_eq!(source.attempts(), 3);
    assert_eq!(script.call_count(), 3);
    assert_eq!(source.state(), RetryState::Success);
    assert_eq!(read_all(&mut source).await.unwrap(), b"media".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_predicate_refusal_is_fatal() {
    let script = Script::new(fail(|| status_error(501)));
    let mut source = RetryDataSource::new(script.boxed(), RetryPolicy::default());

    source.open(&spec()).await.unwrap_err();
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let script = Script::new(fail(timeout));
    let mut source = RetryDataSource::new(script.boxed(), RetryPolicy::default());
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let err = source
        .open(&spec().with_cancel(token))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(script.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_makes_no_attempt() {
    let script = Script::new(serve(b"media"));
    let mut source = RetryDataSource::new(script.boxed(), RetryPolicy::default());
    let token = CancellationToken::new();
    token.cancel();

    let err = source.open(&spec().with_cancel(token)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(script.call_count(), 0);
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_fallback_preserves_primary_error() {
    let primary = Script::new(fail(|| status_error(503)));
    let secondary = Script::new(fail(|| PlaybackError::ConnectionFailed("dns".to_string())));
    let mut source = FallbackDataSource::new(primary.boxed(), secondary.boxed());

    let err = source.open(&spec()).await.unwrap_err();

    assert_eq!(err.http_status(), Some(503));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 1);
    assert_eq!(source.active(), None);
}

#[tokio::test]
async fn test_fallback_serves_when_primary_fails() {
    let primary = Script::new(fail(|| status_error(410)));
    let secondary = Script::new(serve(b"mirror"));
    let mut source = FallbackDataSource::new(primary.boxed(), secondary.boxed());

    source.open(&spec()).await.unwrap();

    assert_eq!(source.active(), Some(ActiveSource::Fallback));
    assert_eq!(read_all(&mut source).await.unwrap(), b"mirror".to_vec());
    source.close().await.unwrap();
    assert_eq!(source.active(), None);
}

#[tokio::test]
async fn test_fallback_not_used_after_cancellation() {
    let primary = Script::new(fail(|| PlaybackError::Cancelled));
    let secondary = Script::new(serve(b"mirror"));
    let mut source = FallbackDataSource::new(primary.boxed(), secondary.boxed());

    assert!(source.open(&spec()).await.unwrap_err().is_cancelled());
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test]
async fn test_read_before_open_is_illegal() {
    let primary = Script::new(serve(b"x"));
    let secondary = Script::new(serve(b"y"));
    let mut source = FallbackDataSource::new(primary.boxed(), secondary.boxed());

    let mut buf = [0u8; 4];
    assert!(matches!(
        source.read(&mut buf).await.unwrap_err(),
        PlaybackError::IllegalState(_)
    ));
}

// ============================================================================
// Classification
// ============================================================================

#[tokio::test]
async fn test_classifying_source_tags_failures() {
    let script = Script::new(fail(|| status_error(403)))
        .then(fail(|| status_error(429)))
        .then(fail(timeout));
    let mut source = ErrorClassifyingDataSource::new(script.boxed());

    let err = source.open(&spec()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(err.http_status(), Some(429));
    let err = source.open(&spec()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(err.is_network_failure());
    let err = source.open(&spec()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NeedsStreamRefresh);
    assert_eq!(err.http_status(), Some(403));
}

#[tokio::test(start_paused = true)]
async fn test_needs_refresh_is_not_retried_through_classifier() {
    let script = Script::new(fail(|| status_error(410)));
    let classified = Box::new(ErrorClassifyingDataSource::new(script.boxed()));
    let mut source = RetryDataSource::new(classified, RetryPolicy::default());

    let err = source.open(&spec()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NeedsStreamRefresh);
    assert_eq!(script.call_count(), 1);
}

// ============================================================================
// Composed upstream chain
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_upstream_chain_recovers_and_retries() {
    let data = payload(300);
    let full = serve(&data);
    let script = Script::new(Arc::new(move |spec: &DataSpec| {
        if spec.length.is_some() {
            Err(status_error(416))
        } else {
            full(spec)
        }
    }))
    .then(fail(|| status_error(503)));

    let factory = UpstreamFactory::new(script.factory());
    let mut source = factory.create();

    source.open(&spec().with_range(100, Some(50))).await.unwrap();
    assert_eq!(read_all(source.as_mut()).await.unwrap(), data[100..].to_vec());

    // 503, then 416 on the retry, then the unranged open.
    assert_eq!(script.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_chain_falls_back_after_retries() {
    let primary = Script::new(fail(timeout));
    let secondary = Script::new(serve(b"mirror"));
    let factory = UpstreamFactory::new(primary.factory())
        .with_fallback(secondary.factory())
        .with_retry_policy(RetryPolicy::default().with_max_retries(1));
    let mut source = factory.create();

    source.open(&spec()).await.unwrap();
    assert_eq!(read_all(source.as_mut()).await.unwrap(), b"mirror".to_vec());
    assert_eq!(primary.call_count(), 2);
    assert_eq!(secondary.call_count(), 1);
}
