//! Integration tests for the lyrics fetcher.

use std::time::Duration;

use pktlyrics::LyricsFetcher;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LRC: &str = "[00:01.00]Hello\n[00:05.00]World\n";

async fn wait_for_lyrics(fetcher: &LyricsFetcher) -> std::sync::Arc<pktlyrics::LyricsIndex> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(index) = fetcher.current() {
                break index;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no lyrics published")
}

#[tokio::test]
async fn exact_endpoint_is_preferred() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/get"))
        .and(query_param("duration", "180"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "syncedLyrics": LRC
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = LyricsFetcher::with_base_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        server.uri(),
    );

    fetcher.request("The Band", "The Song", 180);
    let index = wait_for_lyrics(&fetcher).await;

    assert_eq!(index.len(), 2);
    assert_eq!(index.line_at(1200).unwrap().text, "Hello");
    assert!(fetcher.cache_size() > 0);
}

#[tokio::test]
async fn fuzzy_search_fills_in_when_exact_misses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/get"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "syncedLyrics": null },
            { "syncedLyrics": "" },
            { "syncedLyrics": LRC }
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = LyricsFetcher::with_base_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        server.uri(),
    );

    fetcher.request("Some", "Body", 200);
    let index = wait_for_lyrics(&fetcher).await;
    assert_eq!(index.line_at(6000).unwrap().text, "World");
}

#[tokio::test]
async fn cache_hit_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let key = pktmeta::cache_hash("Cached", "Track");
    std::fs::write(dir.path().join(format!("{key}.lrc")), LRC).unwrap();

    // Unreachable API base: only the cache can serve this.
    let fetcher = LyricsFetcher::with_base_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        "http://127.0.0.1:9".into(),
    );

    fetcher.request("Cached", "Track", 123);
    let index = wait_for_lyrics(&fetcher).await;
    assert_eq!(index.len(), 2);
}

#[tokio::test]
async fn missing_lyrics_publish_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "syncedLyrics": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = LyricsFetcher::with_base_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        server.uri(),
    );

    fetcher.request("Unknown", "Track", 90);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fetcher.current().is_none());
    assert!(!fetcher.is_fetching());
}

#[tokio::test]
async fn clear_cache_empties_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("aabbccdd.lrc"), LRC).unwrap();

    let fetcher = LyricsFetcher::with_base_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        "http://127.0.0.1:9".into(),
    );
    assert!(fetcher.cache_size() > 0);
    fetcher.clear_cache();
    assert_eq!(fetcher.cache_size(), 0);
}
