//! Integration tests for the HLS session against a mock CDN.

use std::sync::Arc;
use std::time::Duration;

use pktaudio::RingBuffer;
use pkthls::HlsSession;
use pktradio::{RadioEvent, RadioState};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A segment body of syntactically valid ADTS frames (garbage payload; the
/// decoder may reject them, the transport must still flow).
fn adts_body(frames: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for _ in 0..frames {
        body.extend_from_slice(&pktdecode::adts::build_header(2, 4, 2, 93));
        body.extend_from_slice(&[0u8; 93]);
    }
    body
}

async fn wait_for_stop(session: &HlsSession) {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match session.state() {
                RadioState::Stopped | RadioState::Error(_) => break,
                _ => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
    })
    .await
    .expect("session never finished");
}

#[tokio::test]
async fn vod_playlist_consumes_segments_in_sequence() {
    let server = MockServer::start().await;

    let playlist = "#EXTM3U\n\
                    #EXT-X-TARGETDURATION:6\n\
                    #EXT-X-MEDIA-SEQUENCE:100\n\
                    #EXTINF:6.0 title=\"Song A\" artist=\"Band A\",\n\
                    seg100.aac\n\
                    #EXTINF:6.0,\n\
                    seg101.aac\n\
                    #EXTINF:6.0,\n\
                    seg102.aac\n\
                    #EXT-X-ENDLIST\n";
    Mock::given(method("GET"))
        .and(path("/stream.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(&server)
        .await;
    // One zero-length segment in the middle must be skipped but counted.
    Mock::given(method("GET"))
        .and(path("/seg101.aac"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/seg10[02]\.aac"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(adts_body(40)))
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(48_000));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let session = HlsSession::start(
        client,
        format!("{}/stream.m3u8", server.uri()),
        ring,
        events_tx,
    );

    wait_for_stop(&session).await;

    let status = session.status();
    assert!(
        !matches!(status.state, RadioState::Error(_)),
        "unexpected error state: {:?}",
        status.state
    );
    // media_sequence 100 + three consumed segments.
    assert_eq!(status.last_played_sequence, 102);
    // 4000 bytes over 6 s ≈ 5 kbps.
    assert!(status.bitrate_kbps > 0);

    // EXTINF metadata flowed through the event channel.
    let mut saw_metadata = false;
    while let Ok(event) = events_rx.try_recv() {
        if let RadioEvent::Metadata(title) = event {
            assert_eq!(title.artist.as_deref(), Some("Band A"));
            assert_eq!(title.title, "Song A");
            saw_metadata = true;
        }
    }
    assert!(saw_metadata, "no metadata event seen");

    session.stop().await;
}

#[tokio::test]
async fn live_refetch_resumes_after_last_played_sequence() {
    let server = MockServer::start().await;

    // First window: sequences 100..=105, live.
    let mut first = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:100\n");
    for seq in 100..106 {
        first.push_str(&format!("#EXTINF:2,\nseg{seq}.aac\n"));
    }
    // Refreshed window: sequences 103..=108, then the stream ends.
    let mut second = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:103\n");
    for seq in 103..109 {
        second.push_str(&format!("#EXTINF:2,\nseg{seq}.aac\n"));
    }
    second.push_str("#EXT-X-ENDLIST\n");

    Mock::given(method("GET"))
        .and(path("/live.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/live.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(second))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/seg\d+\.aac"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(adts_body(10)))
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(48_000));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let session = HlsSession::start(
        client,
        format!("{}/live.m3u8", server.uri()),
        ring,
        events_tx,
    );

    wait_for_stop(&session).await;

    // 100..=105 from the first window, then 106..=108 after the refresh:
    // nothing replayed, nothing skipped.
    assert_eq!(session.status().last_played_sequence, 108);

    session.stop().await;
}

#[tokio::test]
async fn unreachable_segments_are_skipped_after_retries() {
    let server = MockServer::start().await;

    let playlist = "#EXTM3U\n\
                    #EXT-X-MEDIA-SEQUENCE:5\n\
                    #EXTINF:2,\n\
                    gone.aac\n\
                    #EXTINF:2,\n\
                    ok.aac\n\
                    #EXT-X-ENDLIST\n";
    Mock::given(method("GET"))
        .and(path("/short.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.aac"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.aac"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(adts_body(10)))
        .mount(&server)
        .await;

    let client = pktnet::Client::new().unwrap();
    let ring = Arc::new(RingBuffer::new(48_000));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let session = HlsSession::start(
        client,
        format!("{}/short.m3u8", server.uri()),
        ring,
        events_tx,
    );

    wait_for_stop(&session).await;
    // Both sequences count as consumed even though the first was skipped.
    assert_eq!(session.status().last_played_sequence, 6);

    session.stop().await;
}
