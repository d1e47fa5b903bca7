//! Integration tests for the album-art fetcher.

use std::time::Duration;

use pktcovers::CoverFetcher;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A tiny valid PNG to stand in for the artwork asset.
fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 40, 40, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

async fn wait_for_art(fetcher: &CoverFetcher) -> std::sync::Arc<pktcovers::CoverArt> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(art) = fetcher.current() {
                break art;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no artwork published")
}

#[tokio::test]
async fn fetches_decodes_and_caches_artwork() {
    let server = MockServer::start().await;
    let artwork_url = format!("{}/art/100x100bb.png", server.uri());

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("media", "music"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resultCount": 1,
            "results": [{ "artworkUrl100": artwork_url }]
        })))
        .mount(&server)
        .await;
    // The fetcher upscales 100x100 to 600x600.
    Mock::given(method("GET"))
        .and(path("/art/600x600bb.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = CoverFetcher::with_search_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        format!("{}/search", server.uri()),
    );

    fetcher.request("Daft Punk", "One More Time");
    let art = wait_for_art(&fetcher).await;
    assert_eq!(art.image.width(), 4);
    assert!(!fetcher.is_fetching());

    // The raw bytes were written to the cache directory.
    assert!(fetcher.cache_size() > 0);

    // Repeating the request is a no-op (the artwork mock expects one hit).
    fetcher.request("Daft Punk", "One More Time");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fetcher.current().is_some());
}

#[tokio::test]
async fn cache_hit_skips_the_network() {
    let server = MockServer::start().await;
    let artwork_url = format!("{}/art/100x100bb.png", server.uri());

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{ "artworkUrl100": artwork_url }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/art/600x600bb.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = pktnet::Client::new().unwrap();
    let search = format!("{}/search", server.uri());

    let fetcher = CoverFetcher::with_search_url(client.clone(), dir.path().to_path_buf(), search);
    fetcher.request("Artist", "Track");
    wait_for_art(&fetcher).await;
    drop(fetcher);
    server.reset().await; // network now yields nothing

    let offline =
        CoverFetcher::with_search_url(client, dir.path().to_path_buf(), "http://127.0.0.1:9/x".into());
    offline.request("Artist", "Track");
    let art = wait_for_art(&offline).await;
    assert_eq!(art.image.height(), 4);
}

#[tokio::test]
async fn failed_lookups_publish_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resultCount": 0,
            "results": []
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = CoverFetcher::with_search_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        format!("{}/search", server.uri()),
    );

    fetcher.request("Nobody", "Nothing");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fetcher.current().is_none());
}

#[tokio::test]
async fn clear_invalidates_in_flight_fetches() {
    let server = MockServer::start().await;
    let artwork_url = format!("{}/art/100x100bb.png", server.uri());

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "results": [{ "artworkUrl100": artwork_url }]
                }))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/art/600x600bb.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = CoverFetcher::with_search_url(
        pktnet::Client::new().unwrap(),
        dir.path().to_path_buf(),
        format!("{}/search", server.uri()),
    );

    fetcher.request("Slow", "Lookup");
    fetcher.clear(); // bumps the generation before the fetch lands

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        fetcher.current().is_none(),
        "stale fetch must not publish after clear"
    );
}
