//! Integration tests for the player façade with the null audio backend.

use std::{path::Path, time::Duration};

use pktconfig::Paths;
use pktplayer::{Player, PlayerError, PlayerState};

/// Writes a one-second 16-bit stereo WAV at 48 kHz.
fn write_test_wav(path: &Path) {
    let frames: Vec<i16> = (0..48_000)
        .flat_map(|i| {
            let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            [v, v]
        })
        .collect();

    let data_len = (frames.len() * 2) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&48_000u32.to_le_bytes());
    out.extend_from_slice(&(48_000u32 * 4).to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in &frames {
        out.extend_from_slice(&s.to_le_bytes());
    }
    std::fs::write(path, out).unwrap();
}

fn test_player(tmp: &tempfile::TempDir) -> std::sync::Arc<Player> {
    let paths = Paths::with_roots(tmp.path().join("sd"), tmp.path().join("user"));
    Player::new_null(paths).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn load_starts_the_decode_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let wav = tmp.path().join("tone.wav");
    write_test_wav(&wav);

    let player = test_player(&tmp);
    let track = player.load(&wav).await.unwrap();
    assert_eq!(track.duration_ms, 1000);

    let status = player.status();
    assert_eq!(status.state, PlayerState::Playing);
    assert_eq!(status.duration_ms, 1000);

    // The producer thread must be feeding the ring.
    tokio::time::timeout(Duration::from_secs(5), async {
        while player.buffered_frames() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("decode thread produced no audio");

    player.stop().await;
    assert_eq!(player.status().state, PlayerState::Stopped);
    assert_eq!(player.buffered_frames(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn seek_requires_a_loaded_track() {
    let tmp = tempfile::tempdir().unwrap();
    let player = test_player(&tmp);

    let err = player.seek_ms(5_000).unwrap_err();
    assert!(matches!(err, PlayerError::InvalidState(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn seek_is_acknowledged_by_the_decode_thread() {
    let tmp = tempfile::tempdir().unwrap();
    let wav = tmp.path().join("tone.wav");
    write_test_wav(&wav);

    let player = test_player(&tmp);
    player.load(&wav).await.unwrap();

    player.seek_ms(500).unwrap();

    // After the seek the producer refills the ring from the new position.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if player.buffered_frames() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no audio after seek");

    player.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_toggles_the_reported_state() {
    let tmp = tempfile::tempdir().unwrap();
    let wav = tmp.path().join("tone.wav");
    write_test_wav(&wav);

    let player = test_player(&tmp);
    player.load(&wav).await.unwrap();

    player.set_paused(true);
    assert_eq!(player.status().state, PlayerState::Paused);
    player.set_paused(false);
    assert_eq!(player.status().state, PlayerState::Playing);

    player.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_formats_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let bogus = tmp.path().join("notes.txt");
    std::fs::write(&bogus, "not audio").unwrap();

    let player = test_player(&tmp);
    assert!(matches!(
        player.load(&bogus).await,
        Err(PlayerError::Decode(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn settings_updates_persist() {
    let tmp = tempfile::tempdir().unwrap();
    let player = test_player(&tmp);

    player
        .update_settings(|s| s.bass_filter = pktconfig::BassFilter::Hz200)
        .unwrap();

    let reloaded = pktconfig::Settings::load(&player.paths().settings_file());
    assert_eq!(reloaded.bass_filter, pktconfig::BassFilter::Hz200);
}
