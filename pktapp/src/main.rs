//! PKTMusic host binary.
//!
//! Plays one local file or stream URL:
//!
//! ```text
//! pktmusic <path-or-url>
//! pktmusic                # play the first configured radio station
//! ```
//!
//! Ctrl-C stops playback and exits. Exit code is non-zero when the player
//! cannot initialise (audio device or settings directory).

use std::time::Duration;

use anyhow::{bail, Context};
use pktconfig::Paths;
use pktplayer::{Player, PlayerState};
use pktradio::StationList;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let paths = Paths::resolve().context("resolving data directories")?;
    let player = Player::new(paths).context("initialising the player")?;

    // Live sink switching follows the audio routing config in $HOME.
    let _watcher = dirs::home_dir()
        .map(|home| player.start_routing_watcher(&home))
        .transpose()
        .context("starting the routing watcher")?;

    let target = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let stations = StationList::load(&player.paths().stations_file());
            let station = stations
                .stations()
                .first()
                .cloned()
                .context("no argument given and no radio stations configured")?;
            info!(name = %station.name, "no argument given, playing the first station");
            station.url
        }
    };

    if target.starts_with("http://") || target.starts_with("https://") {
        player.play_stream(&target).await?;
    } else {
        let track = player.load(std::path::Path::new(&target)).await?;
        info!(
            title = %track.title.as_deref().unwrap_or("unknown"),
            artist = %track.artist.as_deref().unwrap_or("unknown"),
            duration_ms = track.duration_ms,
            "playing"
        );
    }

    let result = run_until_done(&player).await;
    player.stop().await;
    result
}

/// Polls playback until it finishes or Ctrl-C arrives.
async fn run_until_done(player: &Player) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        if let Some(status) = player.radio_status().await {
            match status.state {
                pktradio::RadioState::Error(message) => bail!("radio error: {message}"),
                pktradio::RadioState::Stopped => return Ok(()),
                _ => {}
            }
            continue;
        }
        if let Some(status) = player.hls_status().await {
            match status.state {
                pktradio::RadioState::Error(message) => bail!("stream error: {message}"),
                pktradio::RadioState::Stopped => return Ok(()),
                _ => {}
            }
            continue;
        }

        let status = player.status();
        if status.state == PlayerState::Stopped {
            info!("playback finished");
            return Ok(());
        }
    }
}
