//! Integration tests for the radio session against a mock Icecast server.

use std::sync::Arc;

use pktaudio::RingBuffer;
use pktradio::{RadioEvent, RadioSession, RadioState};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds an ICY body: `metaint` audio bytes, a metadata block, then some
/// trailing audio.
fn icy_body(metaint: usize, stream_title: &str) -> Vec<u8> {
    let mut body = vec![0u8; metaint];
    let meta = format!("StreamTitle='{stream_title}';");
    let blocks = meta.len().div_ceil(16);
    body.push(blocks as u8);
    let mut block = meta.into_bytes();
    block.resize(blocks * 16, 0);
    body.extend_from_slice(&block);
    body.extend_from_slice(&vec![0u8; metaint]);
    body
}

#[tokio::test]
async fn metadata_and_headers_flow_from_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(header("Icy-MetaData", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("icy-metaint", "64")
                .insert_header("icy-name", "Test FM")
                .insert_header("icy-br", "128")
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(icy_body(64, "The Band - The Song")),
        )
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(4096));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let session = RadioSession::start(
        client,
        format!("{}/stream", server.uri()),
        ring,
        events_tx,
    );

    // The body carries no decodable MP3 frames, but the metadata must still
    // arrive.
    let event = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match events_rx.recv().await {
                Some(RadioEvent::Metadata(title)) => break title,
                Some(_) => continue,
                None => panic!("event channel closed before metadata"),
            }
        }
    })
    .await
    .expect("no metadata event");

    assert_eq!(event.artist.as_deref(), Some("The Band"));
    assert_eq!(event.title, "The Song");

    let status = session.status();
    assert_eq!(status.station_name, "Test FM");
    assert_eq!(status.bitrate_kbps, 128);
    assert_eq!(status.content_type, "audio/mpeg");

    session.stop().await;
}

#[tokio::test]
async fn http_errors_land_in_the_error_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(1024));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let session = RadioSession::start(client, format!("{}/gone", server.uri()), ring, events_tx);

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let RadioState::Error(_) = session.state() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session never reported the HTTP error");

    session.stop().await;
}

#[tokio::test]
async fn stop_clears_state_even_while_connecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(1024));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let session = RadioSession::start(client, format!("{}/slow", server.uri()), ring, events_tx);
    session.stop().await;
}
