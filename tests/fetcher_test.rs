use feed_digest::fetcher::{origin_of, Fetcher};
use feed_digest::types::{DigestError, FetchConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Minimal local server answering every request with HTTP 500, counting hits.
async fn spawn_failing_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            server_hits.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\n\
                      content-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await;
        }
    });
    (addr, hits)
}

#[tokio::test]
async fn persistent_5xx_exhausts_retries_and_blacklists_the_origin() {
    let (addr, hits) = spawn_failing_server().await;
    let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
    let url = format!("http://{addr}/feed.xml");

    let started = Instant::now();
    let err = fetcher.fetch(&url, None, None).await.unwrap_err();
    assert!(matches!(err, DigestError::RetriesExhausted { attempts: 3, .. }));
    // Exactly one request per attempt, no more after the third.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // The attempts are separated by waits of 1 s then 2 s.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "waited only {elapsed:?}");

    // The whole origin is now short-circuited; the server sees nothing.
    let err = fetcher
        .fetch(&format!("http://{addr}/other.xml"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::OriginBlacklisted(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn blacklisted_origin_fails_fast() {
    let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
    fetcher
        .mark_origin_failed("https://down.example/feed.xml")
        .await;

    // Any URL on the same origin is refused without a network attempt.
    let err = fetcher
        .fetch("https://down.example/other/page", None, None)
        .await
        .unwrap_err();
    match err {
        DigestError::OriginBlacklisted(origin) => {
            assert_eq!(origin, "https://down.example");
        }
        other => panic!("expected OriginBlacklisted, got {other:?}"),
    }
}

#[tokio::test]
async fn blacklist_is_per_origin_not_per_url() {
    let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
    fetcher.mark_origin_failed("https://down.example/a").await;

    assert!(fetcher.is_origin_failed("https://down.example/b").await);
    assert!(fetcher.is_origin_failed("HTTPS://DOWN.EXAMPLE/c").await);
    // A different scheme is a different origin.
    assert!(!fetcher.is_origin_failed("http://down.example/b").await);
    assert!(!fetcher.is_origin_failed("https://up.example/b").await);
}

#[test]
fn origin_ignores_path_query_and_case() {
    assert_eq!(
        origin_of("https://Blog.Example/feed.xml?page=2").as_deref(),
        Some("https://blog.example")
    );
}
