//! Tests for the HTTP transport source against a mocked bridge client.

mod common;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{ByteStream, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::BridgeError;
use bytes::Bytes;
use common::{payload, read_all, CountingListener};
use core_playback::datasource::{HttpDataSource, HttpDataSourceFactory, UrlResolver};
use core_playback::{DataSource, DataSourceFactory, DataSpec, PlaybackError, Result};
use futures::StreamExt;
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const URI: &str = "https://cdn.example.com/track.webm";

mock! {
    Client {}

    #[async_trait]
    impl HttpClient for Client {
        async fn open_connection(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

fn body(data: &[u8], chunk: usize) -> ByteStream {
    let chunks: Vec<BridgeResult<Bytes>> = data
        .chunks(chunk.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks).boxed()
}

fn response(status: u16, headers: &[(&str, &str)], data: &[u8]) -> HttpResponse {
    let headers: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    HttpResponse {
        status,
        headers,
        body: body(data, 64),
    }
}

fn source(client: MockClient) -> HttpDataSource {
    HttpDataSource::new(Arc::new(client))
}

#[tokio::test]
async fn test_ranged_request_sends_range_header() {
    let data = payload(300);
    let served = data[100..200].to_vec();

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .withf(|req| req.url == URI && req.header_value("Range") == Some("bytes=100-199"))
        .times(1)
        .returning(move |_| {
            Ok(response(
                206,
                &[("Content-Length", "100"), ("Content-Range", "bytes 100-199/300")],
                &served,
            ))
        });

    let mut source = source(client);
    let spec = DataSpec::new(URI).with_range(100, Some(100));
    assert_eq!(source.open(&spec).await.unwrap(), Some(100));
    assert_eq!(source.uri(), Some(URI));
    assert_eq!(read_all(&mut source).await.unwrap(), data[100..200].to_vec());
    source.close().await.unwrap();
    assert_eq!(source.uri(), None);
}

#[tokio::test]
async fn test_whole_resource_request_has_no_range_header() {
    let data = payload(150);
    let served = data.clone();

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .withf(|req| req.header_value("Range").is_none())
        .times(1)
        .returning(move |_| Ok(response(200, &[("Content-Length", "150")], &served)));

    let mut source = source(client);
    assert_eq!(source.open(&DataSpec::new(URI)).await.unwrap(), Some(150));
    assert_eq!(read_all(&mut source).await.unwrap(), data);
}

#[tokio::test]
async fn test_ignored_range_skips_leading_bytes() {
    let data = payload(300);
    let served = data.clone();

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(move |_| Ok(response(200, &[("Content-Length", "300")], &served)));

    let mut source = source(client);
    let spec = DataSpec::new(URI).with_range(100, None);
    assert_eq!(source.open(&spec).await.unwrap(), Some(200));
    assert_eq!(read_all(&mut source).await.unwrap(), data[100..].to_vec());
}

#[tokio::test]
async fn test_range_at_end_of_resource_is_empty() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .withf(|req| req.header_value("Range") == Some("bytes=500-"))
        .returning(|_| Ok(response(416, &[("Content-Range", "bytes */500")], b"")));

    let mut source = source(client);
    let spec = DataSpec::new(URI).with_range(500, None);
    assert_eq!(source.open(&spec).await.unwrap(), Some(0));

    let mut buf = [0u8; 16];
    assert_eq!(source.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsatisfiable_range_inside_resource_is_an_error() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(|_| Ok(response(416, &[("Content-Range", "bytes */900")], b"")));

    let mut source = source(client);
    let err = source
        .open(&DataSpec::new(URI).with_range(500, None))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), Some(416));
}

#[tokio::test]
async fn test_error_status_redacts_query() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(|_| Ok(response(404, &[], b"not found")));

    let mut source = source(client);
    let err = source
        .open(&DataSpec::new(
            "https://cdn.example.com/track.webm?token=secret&expires=1",
        ))
        .await
        .unwrap_err();

    match err {
        PlaybackError::InvalidResponseCode { status, uri } => {
            assert_eq!(status, 404);
            assert_eq!(uri, "https://cdn.example.com/track.webm?[REDACTED]");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_short_body_is_end_of_stream() {
    let short = payload(60);

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(move |_| Ok(response(206, &[("Content-Length", "100")], &short)));

    let mut source = source(client);
    source
        .open(&DataSpec::new(URI).with_range(0, Some(100)))
        .await
        .unwrap();

    let err = read_all(&mut source).await.unwrap_err();
    assert!(err.is_end_of_stream());
}

#[tokio::test]
async fn test_transport_failures_keep_network_mapping() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(|_| Err(BridgeError::Timeout("connect".to_string())));

    let mut source = source(client);
    let err = source.open(&DataSpec::new(URI)).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Timeout(_)));
    assert!(err.is_network_failure());
}

#[tokio::test]
async fn test_body_error_is_streaming_failure() {
    let mut client = MockClient::new();
    client.expect_open_connection().returning(|_| {
        let chunks: Vec<BridgeResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(BridgeError::OperationFailed("connection reset".to_string())),
        ];
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: futures::stream::iter(chunks).boxed(),
        })
    });

    let mut source = source(client);
    assert_eq!(source.open(&DataSpec::new(URI)).await.unwrap(), None);

    let mut buf = [0u8; 32];
    assert_eq!(source.read(&mut buf).await.unwrap(), 7);
    assert!(matches!(
        source.read(&mut buf).await.unwrap_err(),
        PlaybackError::StreamingFailed(_)
    ));
}

#[tokio::test]
async fn test_cancelled_request_never_connects() {
    let token = CancellationToken::new();
    token.cancel();

    let mut source = source(MockClient::new());
    let err = source
        .open(&DataSpec::new(URI).with_cancel(token))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_cancellation_stops_reads() {
    let data = payload(200);

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(move |_| Ok(response(200, &[("Content-Length", "200")], &data)));

    let token = CancellationToken::new();
    let mut source = source(client);
    source
        .open(&DataSpec::new(URI).with_cancel(token.clone()))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(source.read(&mut buf).await.unwrap(), 16);

    token.cancel();
    // The pending chunk is still buffered; the next network read observes cancellation.
    loop {
        match source.read(&mut buf).await {
            Ok(n) => assert!(n > 0),
            Err(e) => {
                assert!(e.is_cancelled());
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_open_twice_is_illegal() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .times(1)
        .returning(|_| Ok(response(200, &[], b"media")));

    let mut source = source(client);
    source.open(&DataSpec::new(URI)).await.unwrap();
    assert!(matches!(
        source.open(&DataSpec::new(URI)).await.unwrap_err(),
        PlaybackError::IllegalState(_)
    ));
}

#[tokio::test]
async fn test_listeners_see_the_transfer() {
    let data = payload(250);
    let served = data.clone();

    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .returning(move |_| Ok(response(200, &[("Content-Length", "250")], &served)));

    let listener = Arc::new(CountingListener::default());
    let mut source = source(client);
    source.add_transfer_listener(listener.clone());

    source.open(&DataSpec::new(URI)).await.unwrap();
    assert_eq!(listener.starts.load(Ordering::SeqCst), 1);
    read_all(&mut source).await.unwrap();
    source.close().await.unwrap();

    assert_eq!(listener.bytes.load(Ordering::SeqCst), 250);
    assert_eq!(listener.ends.load(Ordering::SeqCst), 1);
}

struct SignedUrls;

#[async_trait]
impl UrlResolver for SignedUrls {
    async fn resolve(&self, key: &str, _uri: &str) -> Result<String> {
        Ok(format!("https://signed.example.com/{key}?sig=fresh"))
    }
}

#[tokio::test]
async fn test_factory_applies_resolver_and_default_headers() {
    let mut client = MockClient::new();
    client
        .expect_open_connection()
        .withf(|req| {
            req.url == "https://signed.example.com/track-1?sig=fresh"
                && req.header_value("x-client") == Some("media-cache")
        })
        .times(1)
        .returning(|_| Ok(response(200, &[("Content-Length", "5")], b"media")));

    let factory = HttpDataSourceFactory::new(Arc::new(client))
        .with_resolver(Arc::new(SignedUrls))
        .with_header("X-Client", "media-cache");

    let mut source = factory.create();
    let spec = DataSpec::new(URI).with_key("track-1");
    assert_eq!(source.open(&spec).await.unwrap(), Some(5));
    assert_eq!(
        source.uri(),
        Some("https://signed.example.com/track-1?sig=fresh")
    );
    assert_eq!(read_all(source.as_mut()).await.unwrap(), b"media".to_vec());
}
