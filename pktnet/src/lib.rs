//! # pktnet
//!
//! HTTP(S) transport for the player: one-shot fetches (playlists, API
//! responses, artwork), streaming bodies for radio/HLS, and file downloads
//! with progress reporting and cancellation.
//!
//! Radio stream hosts sit behind a zoo of CDNs and self-signed certificate
//! chains, so certificate verification is disabled and SNI is taken from the
//! request URL. Some of those CDNs also gzip bodies while claiming identity
//! encoding, so fetched bodies are sniffed for the gzip magic and inflated
//! when the header-driven path did not already do it.
//!
//! ## Example
//!
//! ```no_run
//! use pktnet::Client;
//!
//! # async fn example() -> Result<(), pktnet::NetError> {
//! let client = Client::new()?;
//! let playlist = client.fetch_capped("https://example.com/stream.m3u8", 64 * 1024).await?;
//! # Ok(())
//! # }
//! ```

use std::{io::Read, path::Path, time::Duration};

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receive/send timeout applied to every connection.
pub const NET_TIMEOUT: Duration = Duration::from_secs(15);

/// Redirect ceiling for one-shot fetches and downloads.
pub const MAX_REDIRECTS: usize = 10;

/// Redirect ceiling for live stream connections.
pub const MAX_STREAM_REDIRECTS: usize = 5;

/// Chunk size used when streaming downloads to disk.
const DOWNLOAD_CHUNK: usize = 32 * 1024;

/// Transport failures, one variant per failure class the UI distinguishes.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("malformed URL: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error {0}")]
    Status(u16),
    #[error("too many redirects")]
    RedirectLoop,
    #[error("response body error: {0}")]
    Body(String),
    #[error("gzip decode error: {0}")]
    Gzip(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download cancelled")]
    Cancelled,
    #[error("HTTP client init failed: {0}")]
    Init(String),
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetError::Timeout
        } else if err.is_redirect() {
            NetError::RedirectLoop
        } else if let Some(status) = err.status() {
            NetError::Status(status.as_u16())
        } else if err.is_connect() || err.is_request() {
            NetError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            NetError::Body(err.to_string())
        } else {
            NetError::Connect(err.to_string())
        }
    }
}

/// Shared HTTP client.
///
/// Holds two reqwest clients: the general one (10 redirects, gzip) and the
/// stream one (5 redirects, no decompression so ICY byte counting stays
/// exact).
#[derive(Debug, Clone)]
pub struct Client {
    general: reqwest::Client,
    stream: reqwest::Client,
}

impl Client {
    pub fn new() -> Result<Self, NetError> {
        let general = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(NET_TIMEOUT)
            .read_timeout(NET_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent("PKTMusic/1.0")
            .build()
            .map_err(|e| NetError::Init(e.to_string()))?;

        let stream = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(NET_TIMEOUT)
            .read_timeout(NET_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_STREAM_REDIRECTS))
            .no_gzip()
            .user_agent("PKTMusic/1.0")
            .build()
            .map_err(|e| NetError::Init(e.to_string()))?;

        Ok(Self { general, stream })
    }

    /// Fetches `url` fully into memory.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, NetError> {
        let response = self.general.get(parse_url(url)?).send().await?;
        let response = check_status(response)?;
        let body = response.bytes().await?;
        maybe_gunzip(body)
    }

    /// Fetches `url` into memory, truncating the body at `cap` bytes.
    ///
    /// Used for playlist-sized resources where anything beyond the cap is
    /// either corruption or content we would drop anyway.
    pub async fn fetch_capped(&self, url: &str, cap: usize) -> Result<Bytes, NetError> {
        let response = self.general.get(parse_url(url)?).send().await?;
        let response = check_status(response)?;

        let mut body = Vec::with_capacity(cap.min(64 * 1024));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(NetError::from)?;
            let room = cap.saturating_sub(body.len());
            if room == 0 {
                debug!(url, cap, "fetch body truncated at cap");
                break;
            }
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        maybe_gunzip(Bytes::from(body))
    }

    /// Issues a GET and hands back the live response for body streaming.
    ///
    /// `headers` carries protocol extras such as `Icy-MetaData: 1`. The
    /// stream-side redirect policy (5 hops) applies.
    pub async fn get_streaming(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, NetError> {
        let mut request = self.stream.get(parse_url(url)?);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        check_status(response)
    }

    /// Downloads `url` to `path`, streaming in ~32 KiB chunks.
    ///
    /// `progress` receives 0..=100 as data arrives (only when the server
    /// reported a length). A cancelled token aborts the transfer; partial
    /// files are removed on cancellation and on failure.
    pub async fn download(
        &self,
        url: &str,
        path: &Path,
        progress: impl Fn(u8),
        cancel: &CancellationToken,
    ) -> Result<u64, NetError> {
        let response = self.general.get(parse_url(url)?).send().await?;
        let response = check_status(response)?;
        let expected = response.content_length();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;

        let result = Self::copy_body(response, &mut file, expected, &progress, cancel).await;
        match result {
            Ok(written) => {
                file.flush().await?;
                Ok(written)
            }
            Err(err) => {
                drop(file);
                if let Err(rm_err) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), %rm_err, "failed to remove partial download");
                }
                Err(err)
            }
        }
    }

    async fn copy_body(
        response: reqwest::Response,
        file: &mut tokio::fs::File,
        expected: Option<u64>,
        progress: &impl Fn(u8),
        cancel: &CancellationToken,
    ) -> Result<u64, NetError> {
        let mut written = 0u64;
        let mut pending: Vec<u8> = Vec::with_capacity(DOWNLOAD_CHUNK);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(NetError::from)?;

            pending.extend_from_slice(&chunk);
            if pending.len() >= DOWNLOAD_CHUNK {
                file.write_all(&pending).await?;
                written += pending.len() as u64;
                pending.clear();
                report_progress(progress, written, expected);
            }
        }

        if !pending.is_empty() {
            file.write_all(&pending).await?;
            written += pending.len() as u64;
        }
        report_progress(progress, written, expected.or(Some(written.max(1))));
        Ok(written)
    }
}

fn report_progress(progress: &impl Fn(u8), written: u64, expected: Option<u64>) {
    if let Some(total) = expected.filter(|t| *t > 0) {
        let pct = ((written.saturating_mul(100)) / total).min(100) as u8;
        progress(pct);
    }
}

fn parse_url(url: &str) -> Result<url::Url, NetError> {
    let parsed = url::Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(NetError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, NetError> {
    let status = response.status();
    // Anything still 3xx here was a redirect the client could not follow
    // (e.g. a 301 without a Location header).
    if status.as_u16() >= 300 {
        return Err(NetError::Status(status.as_u16()));
    }
    Ok(response)
}

/// Inflates bodies that carry the gzip magic despite an identity
/// Content-Encoding (reqwest already handled the honest case).
fn maybe_gunzip(body: Bytes) -> Result<Bytes, NetError> {
    if body.len() < 2 || body[0] != 0x1f || body[1] != 0x8b {
        return Ok(body);
    }
    let mut decoder = GzDecoder::new(body.as_ref());
    let mut out = Vec::with_capacity(body.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| NetError::Gzip(e.to_string()))?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            parse_url("ftp://example.com/x"),
            Err(NetError::InvalidUrl(_))
        ));
        assert!(matches!(parse_url("not a url"), Err(NetError::InvalidUrl(_))));
    }

    #[test]
    fn gunzip_passthrough_for_plain_bodies() {
        let body = Bytes::from_static(b"#EXTM3U\n");
        assert_eq!(maybe_gunzip(body.clone()).unwrap(), body);
    }

    #[test]
    fn gunzip_inflates_magic_bodies() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello radio").unwrap();
        let compressed = encoder.finish().unwrap();

        let inflated = maybe_gunzip(Bytes::from(compressed)).unwrap();
        assert_eq!(inflated.as_ref(), b"hello radio");
    }

    #[test]
    fn gunzip_reports_corrupt_streams() {
        let bogus = Bytes::from_static(&[0x1f, 0x8b, 0xff, 0xff, 0x00]);
        assert!(matches!(maybe_gunzip(bogus), Err(NetError::Gzip(_))));
    }
}
