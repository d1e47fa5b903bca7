//! Hand-rolled Ogg page reading.
//!
//! lewton handles the Vorbis case end to end, but Opus goes through the raw
//! `opus` codec, so the container layer lives here: page parsing, packet
//! assembly across pages, and the tail scan that recovers a stream's total
//! duration from its final granule position.

use std::{
    collections::VecDeque,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::DecodeError;

const CAPTURE: &[u8; 4] = b"OggS";

/// How much of the file tail to scan for the last page.
const TAIL_SCAN: u64 = 64 * 1024;

/// Streaming packet reader over Ogg pages.
pub struct OggPageReader<R: Read> {
    reader: R,
    current_packet: Vec<u8>,
    queue: VecDeque<Vec<u8>>,
    finished: bool,
    /// Granule position of the most recently parsed page.
    page_granule: u64,
}

impl<R: Read> OggPageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            current_packet: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
            page_granule: 0,
        }
    }

    /// Granule position of the last page whose data has been queued.
    pub fn page_granule(&self) -> u64 {
        self.page_granule
    }

    /// Returns the next complete packet, or `None` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }
            self.read_page()?;
        }
    }

    fn read_page(&mut self) -> Result<(), DecodeError> {
        let mut header = [0u8; 27];
        if !self.read_exact_or_eof(&mut header)? {
            self.finished = true;
            return Ok(());
        }
        if &header[0..4] != CAPTURE {
            return Err(DecodeError::Container("lost Ogg page sync".into()));
        }

        let granule = u64::from_le_bytes([
            header[6], header[7], header[8], header[9], header[10], header[11], header[12],
            header[13],
        ]);
        let segment_count = header[26] as usize;

        let mut lacing = vec![0u8; segment_count];
        if !self.read_exact_or_eof(&mut lacing)? {
            self.finished = true;
            return Ok(());
        }

        let body_len: usize = lacing.iter().map(|l| *l as usize).sum();
        let mut body = vec![0u8; body_len];
        if !self.read_exact_or_eof(&mut body)? {
            self.finished = true;
            return Ok(());
        }

        // A granule of all-ones means "no packet finishes on this page".
        if granule != u64::MAX {
            self.page_granule = granule;
        }

        let mut offset = 0usize;
        for &lace in &lacing {
            let lace = lace as usize;
            self.current_packet
                .extend_from_slice(&body[offset..offset + lace]);
            offset += lace;
            if lace < 255 {
                self.queue.push_back(std::mem::take(&mut self.current_packet));
            }
        }

        // End-of-stream flag: no more pages follow.
        if header[5] & 0x04 != 0 {
            self.finished = true;
            if !self.current_packet.is_empty() {
                self.queue.push_back(std::mem::take(&mut self.current_packet));
            }
        }

        Ok(())
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool, DecodeError> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.reader.read(&mut buf[filled..])?;
            if read == 0 {
                // Truncated page at end of file: treat as end of stream.
                return Ok(false);
            }
            filled += read;
        }
        Ok(true)
    }
}

/// Reads the granule position of the last complete page in an Ogg file.
///
/// For Vorbis this is the total PCM frame count; for Opus it is in 48 kHz
/// units and still includes the pre-skip.
pub fn last_granule_position(path: &Path) -> Result<Option<u64>, DecodeError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let scan = TAIL_SCAN.min(len);
    file.seek(SeekFrom::Start(len - scan))?;

    let mut tail = Vec::with_capacity(scan as usize);
    file.read_to_end(&mut tail)?;

    let mut best: Option<u64> = None;
    let mut pos = 0usize;
    while pos + 27 <= tail.len() {
        if &tail[pos..pos + 4] == CAPTURE && tail[pos + 4] == 0 {
            let granule = u64::from_le_bytes([
                tail[pos + 6],
                tail[pos + 7],
                tail[pos + 8],
                tail[pos + 9],
                tail[pos + 10],
                tail[pos + 11],
                tail[pos + 12],
                tail[pos + 13],
            ]);
            if granule != u64::MAX {
                best = Some(granule);
            }
            pos += 27;
        } else {
            pos += 1;
        }
    }
    Ok(best)
}
