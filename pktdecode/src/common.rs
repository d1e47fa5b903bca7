//! Adapters shared between the file decoders and the live-stream paths.

use std::io::{self, Read};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Bridges an async byte channel to the synchronous `Read` the codec crates
/// want. The radio producer feeds network chunks into the sending side; a
/// blocking decode task reads from this end.
pub struct ChannelReader {
    rx: mpsc::Receiver<Result<Bytes, String>>,
    current: Bytes,
    offset: usize,
    finished: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, String>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            offset: 0,
            finished: false,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.current.len() {
                let n = buf.len().min(self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            match self.rx.blocking_recv() {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    self.current = bytes;
                    self.offset = 0;
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Err(io::Error::other(err));
                }
                None => {
                    self.finished = true;
                    return Ok(0);
                }
            }
        }
    }
}
