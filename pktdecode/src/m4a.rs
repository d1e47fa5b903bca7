//! M4A (MP4 container) decoding.
//!
//! The container layer is parsed by hand: we walk `moov` for the audio
//! track's sample tables and the AudioSpecificConfig, then read access units
//! straight out of `mdat` by offset. Each unit is wrapped in a synthesised
//! ADTS header so the shared fdk-aac transport decodes it, keeping one AAC
//! path for files, radio and HLS alike.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use tracing::debug;

use crate::{
    aacstream::AacStreamDecoder,
    adts,
    AudioFormat, DecodeError, DecoderInfo, PendingPcm,
};

/// PCM frames per AAC access unit at the core sample rate.
const AAC_FRAME_LEN: u64 = 1024;

/// Audio parameters from the AudioSpecificConfig inside `esds`.
#[derive(Debug, Clone, Copy)]
struct AscInfo {
    object_type: u8,
    freq_index: u8,
    channel_config: u8,
}

impl AscInfo {
    fn sample_rate(&self) -> Option<u32> {
        adts::SAMPLE_RATES.get(self.freq_index as usize).copied()
    }
}

/// Flattened sample table for the audio track.
struct SampleTable {
    /// Byte offset of every access unit in the file.
    offsets: Vec<u64>,
    /// Size of every access unit.
    sizes: Vec<u32>,
    /// Track duration in timescale units.
    duration: u64,
    timescale: u32,
}

pub struct M4aDecoder {
    file: File,
    table: SampleTable,
    asc: AscInfo,
    aac: AacStreamDecoder,
    info: DecoderInfo,
    current_sample: usize,
    pending: PendingPcm,
    position: u64,
    eof: bool,
}

impl M4aDecoder {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let mut file = File::open(path)?;
        let moov = find_top_level_box(&mut file, b"moov")?
            .ok_or_else(|| DecodeError::Container("MP4 file has no moov box".into()))?;

        let (table, asc) = parse_audio_track(&moov)?;
        if table.offsets.is_empty() {
            return Err(DecodeError::Container("MP4 audio track has no samples".into()));
        }

        let sample_rate = asc
            .sample_rate()
            .ok_or_else(|| DecodeError::Container("reserved AAC frequency index".into()))?;
        let total_frames = if table.timescale > 0 {
            table.duration * sample_rate as u64 / table.timescale as u64
        } else {
            table.offsets.len() as u64 * AAC_FRAME_LEN
        };

        debug!(
            sample_rate,
            channels = asc.channel_config,
            samples = table.offsets.len(),
            total_frames,
            "M4A stream opened"
        );

        Ok(Self {
            file,
            info: DecoderInfo {
                format: AudioFormat::M4a,
                sample_rate,
                channels: asc.channel_config.min(2),
                total_frames,
            },
            table,
            asc,
            aac: AacStreamDecoder::new(),
            current_sample: 0,
            pending: PendingPcm::default(),
            position: 0,
            eof: false,
        })
    }

    pub fn info(&self) -> DecoderInfo {
        self.info
    }

    pub fn read(&mut self, out: &mut [i16]) -> Result<usize, DecodeError> {
        let want_frames = out.len() / 2;
        let mut written = self.pending.drain_into(out);

        while written < want_frames && !self.eof {
            if self.current_sample >= self.table.offsets.len() {
                self.eof = true;
                break;
            }

            let offset = self.table.offsets[self.current_sample];
            let size = self.table.sizes[self.current_sample] as usize;
            self.current_sample += 1;
            if size == 0 {
                continue;
            }

            let mut frame = Vec::with_capacity(size + 7);
            frame.extend_from_slice(&adts::build_header(
                self.asc.object_type,
                self.asc.freq_index,
                self.asc.channel_config,
                size,
            ));
            let start = frame.len();
            frame.resize(start + size, 0);
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut frame[start..])?;

            let pending = &mut self.pending;
            self.aac.push(&frame, |pcm, channels, _rate| {
                pending.push_interleaved(pcm, channels as usize);
            })?;

            written += self.pending.drain_into(&mut out[written * 2..]);
        }

        self.position += written as u64;
        Ok(written)
    }

    /// Seeks to the AAC access unit containing `frame`, rounded down to the
    /// 1024-frame unit boundary. Transport and leftover state is cleared.
    pub fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        let clamped = frame.min(self.info.total_frames);
        let sample = (clamped / AAC_FRAME_LEN) as usize;
        self.current_sample = sample.min(self.table.offsets.len());
        self.aac.reset();
        self.pending.clear();
        self.eof = false;
        self.position = self.current_sample as u64 * AAC_FRAME_LEN;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}

/// Reads top-level boxes until `name` is found; returns its body.
fn find_top_level_box(file: &mut File, name: &[u8; 4]) -> Result<Option<Vec<u8>>, DecodeError> {
    file.seek(SeekFrom::Start(0))?;
    let file_len = file.metadata()?.len();
    let mut pos = 0u64;

    while pos + 8 <= file_len {
        file.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let box_type = [header[4], header[5], header[6], header[7]];

        let (body_offset, box_size) = if size32 == 1 {
            let mut large = [0u8; 8];
            file.read_exact(&mut large)?;
            (16u64, u64::from_be_bytes(large))
        } else if size32 == 0 {
            (8u64, file_len - pos)
        } else {
            (8u64, size32)
        };

        if box_size < body_offset || pos + box_size > file_len {
            return Err(DecodeError::Container("MP4 box overruns file".into()));
        }

        if &box_type == name {
            let mut body = vec![0u8; (box_size - body_offset) as usize];
            file.read_exact(&mut body)?;
            return Ok(Some(body));
        }
        pos += box_size;
    }
    Ok(None)
}

/// Iterates child boxes of an in-memory box body.
fn child_boxes(body: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        if pos + 8 > body.len() {
            return None;
        }
        let size = u32::from_be_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]])
            as usize;
        if size < 8 || pos + size > body.len() {
            return None;
        }
        let name = &body[pos + 4..pos + 8];
        let content = &body[pos + 8..pos + size];
        pos += size;
        Some((name, content))
    })
}

fn find_child<'a>(body: &'a [u8], name: &[u8; 4]) -> Option<&'a [u8]> {
    child_boxes(body).find(|(n, _)| *n == name).map(|(_, c)| c)
}

/// Locates the audio track in `moov` and flattens its sample tables.
fn parse_audio_track(moov: &[u8]) -> Result<(SampleTable, AscInfo), DecodeError> {
    for (name, trak) in child_boxes(moov) {
        if name != b"trak" {
            continue;
        }
        let Some(mdia) = find_child(trak, b"mdia") else {
            continue;
        };
        let Some(hdlr) = find_child(mdia, b"hdlr") else {
            continue;
        };
        // handler_type sits after version/flags and pre_defined
        if hdlr.len() < 12 || &hdlr[8..12] != b"soun" {
            continue;
        }

        let mdhd = find_child(mdia, b"mdhd")
            .ok_or_else(|| DecodeError::Container("audio track missing mdhd".into()))?;
        let (timescale, duration) = parse_mdhd(mdhd)?;

        let stbl = find_child(mdia, b"minf")
            .and_then(|minf| find_child(minf, b"stbl"))
            .ok_or_else(|| DecodeError::Container("audio track missing stbl".into()))?;

        let asc = parse_stsd(
            find_child(stbl, b"stsd")
                .ok_or_else(|| DecodeError::Container("audio track missing stsd".into()))?,
        )?;

        let sizes = parse_stsz(
            find_child(stbl, b"stsz")
                .ok_or_else(|| DecodeError::Container("audio track missing stsz".into()))?,
        )?;
        let chunk_offsets = parse_chunk_offsets(stbl)?;
        let stsc = parse_stsc(
            find_child(stbl, b"stsc")
                .ok_or_else(|| DecodeError::Container("audio track missing stsc".into()))?,
        )?;

        let offsets = flatten_offsets(&sizes, &chunk_offsets, &stsc);
        return Ok((
            SampleTable {
                offsets,
                sizes,
                duration,
                timescale,
            },
            asc,
        ));
    }
    Err(DecodeError::Container("MP4 file has no audio track".into()))
}

fn parse_mdhd(mdhd: &[u8]) -> Result<(u32, u64), DecodeError> {
    if mdhd.len() < 4 {
        return Err(DecodeError::Container("mdhd too small".into()));
    }
    match mdhd[0] {
        0 if mdhd.len() >= 20 => {
            let timescale = u32::from_be_bytes([mdhd[12], mdhd[13], mdhd[14], mdhd[15]]);
            let duration = u32::from_be_bytes([mdhd[16], mdhd[17], mdhd[18], mdhd[19]]) as u64;
            Ok((timescale, duration))
        }
        1 if mdhd.len() >= 32 => {
            let timescale = u32::from_be_bytes([mdhd[20], mdhd[21], mdhd[22], mdhd[23]]);
            let duration = u64::from_be_bytes([
                mdhd[24], mdhd[25], mdhd[26], mdhd[27], mdhd[28], mdhd[29], mdhd[30], mdhd[31],
            ]);
            Ok((timescale, duration))
        }
        _ => Err(DecodeError::Container("mdhd truncated".into())),
    }
}

/// Extracts the AudioSpecificConfig from `stsd`'s mp4a entry.
fn parse_stsd(stsd: &[u8]) -> Result<AscInfo, DecodeError> {
    // version/flags + entry count, then the first sample entry
    if stsd.len() < 16 {
        return Err(DecodeError::Container("stsd too small".into()));
    }
    let entry = &stsd[8..];
    let entry_size = u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
    if entry_size < 36 || entry_size > entry.len() || &entry[4..8] != b"mp4a" {
        return Err(DecodeError::Container("stsd entry is not mp4a".into()));
    }

    // mp4a sample entry: 8 header + 28 bytes of audio sample description,
    // then child boxes (esds among them).
    let children = &entry[36..entry_size];
    let esds = child_boxes(children)
        .find(|(n, _)| *n == b"esds")
        .map(|(_, c)| c)
        .ok_or_else(|| DecodeError::Container("mp4a entry missing esds".into()))?;

    parse_esds(esds)
}

/// Walks the esds descriptor chain down to the AudioSpecificConfig.
fn parse_esds(esds: &[u8]) -> Result<AscInfo, DecodeError> {
    // 4 bytes version/flags, then the ES descriptor
    let mut cursor = &esds[4.min(esds.len())..];

    let (tag, body) = read_descriptor(cursor)
        .ok_or_else(|| DecodeError::Container("esds missing ES descriptor".into()))?;
    if tag != 0x03 || body.len() < 3 {
        return Err(DecodeError::Container("malformed ES descriptor".into()));
    }
    // ES_ID (2) + stream flags (1); optional fields are absent in the files
    // our muxers produce.
    cursor = &body[3..];

    let (tag, body) = read_descriptor(cursor)
        .ok_or_else(|| DecodeError::Container("esds missing decoder config".into()))?;
    if tag != 0x04 || body.len() < 13 {
        return Err(DecodeError::Container("malformed decoder config".into()));
    }
    cursor = &body[13..];

    let (tag, asc) = read_descriptor(cursor)
        .ok_or_else(|| DecodeError::Container("esds missing AudioSpecificConfig".into()))?;
    if tag != 0x05 || asc.len() < 2 {
        return Err(DecodeError::Container("malformed AudioSpecificConfig".into()));
    }

    Ok(AscInfo {
        object_type: asc[0] >> 3,
        freq_index: ((asc[0] & 0x07) << 1) | (asc[1] >> 7),
        channel_config: (asc[1] >> 3) & 0x0f,
    })
}

/// Reads one `tag, varlen-length, body` descriptor.
fn read_descriptor(data: &[u8]) -> Option<(u8, &[u8])> {
    if data.is_empty() {
        return None;
    }
    let tag = data[0];
    let mut len = 0usize;
    let mut pos = 1usize;
    for _ in 0..4 {
        let byte = *data.get(pos)?;
        pos += 1;
        len = (len << 7) | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            break;
        }
    }
    data.get(pos..pos + len).map(|body| (tag, body))
}

fn parse_stsz(stsz: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if stsz.len() < 12 {
        return Err(DecodeError::Container("stsz too small".into()));
    }
    let uniform = u32::from_be_bytes([stsz[4], stsz[5], stsz[6], stsz[7]]);
    let count = u32::from_be_bytes([stsz[8], stsz[9], stsz[10], stsz[11]]) as usize;

    if uniform != 0 {
        return Ok(vec![uniform; count]);
    }
    let table = &stsz[12..];
    if table.len() < count * 4 {
        return Err(DecodeError::Container("stsz table truncated".into()));
    }
    Ok(table
        .chunks_exact(4)
        .take(count)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_chunk_offsets(stbl: &[u8]) -> Result<Vec<u64>, DecodeError> {
    if let Some(stco) = find_child(stbl, b"stco") {
        if stco.len() < 8 {
            return Err(DecodeError::Container("stco too small".into()));
        }
        let count = u32::from_be_bytes([stco[4], stco[5], stco[6], stco[7]]) as usize;
        let table = stco.get(8..8 + count * 4).ok_or_else(|| {
            DecodeError::Container("stco table truncated".into())
        })?;
        return Ok(table
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as u64)
            .collect());
    }
    if let Some(co64) = find_child(stbl, b"co64") {
        if co64.len() < 8 {
            return Err(DecodeError::Container("co64 too small".into()));
        }
        let count = u32::from_be_bytes([co64[4], co64[5], co64[6], co64[7]]) as usize;
        let table = co64.get(8..8 + count * 8).ok_or_else(|| {
            DecodeError::Container("co64 table truncated".into())
        })?;
        return Ok(table
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect());
    }
    Err(DecodeError::Container("audio track missing stco/co64".into()))
}

/// stsc entries: (first_chunk, samples_per_chunk).
fn parse_stsc(stsc: &[u8]) -> Result<Vec<(u32, u32)>, DecodeError> {
    if stsc.len() < 8 {
        return Err(DecodeError::Container("stsc too small".into()));
    }
    let count = u32::from_be_bytes([stsc[4], stsc[5], stsc[6], stsc[7]]) as usize;
    let table = stsc.get(8..8 + count * 12).ok_or_else(|| {
        DecodeError::Container("stsc table truncated".into())
    })?;
    Ok(table
        .chunks_exact(12)
        .map(|c| {
            (
                u32::from_be_bytes([c[0], c[1], c[2], c[3]]),
                u32::from_be_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect())
}

/// Expands the chunk tables into one byte offset per sample.
fn flatten_offsets(sizes: &[u32], chunk_offsets: &[u64], stsc: &[(u32, u32)]) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut sample = 0usize;

    for (chunk_idx, &chunk_start) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_idx as u32 + 1;
        let per_chunk = stsc
            .iter()
            .rev()
            .find(|(first, _)| *first <= chunk_number)
            .map(|(_, n)| *n)
            .unwrap_or(0) as usize;

        let mut offset = chunk_start;
        for _ in 0..per_chunk {
            if sample >= sizes.len() {
                return offsets;
            }
            offsets.push(offset);
            offset += sizes[sample] as u64;
            sample += 1;
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reader_handles_varlen_lengths() {
        // tag 0x05, two-byte length encoding of 3, body [1,2,3]
        let data = [0x05, 0x80, 0x03, 1, 2, 3];
        let (tag, body) = read_descriptor(&data).unwrap();
        assert_eq!(tag, 0x05);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn asc_fields_unpack() {
        // AAC-LC (2), 44.1 kHz (index 4), stereo (2):
        // 00010 0100 0010 000 -> 0x12 0x10
        let mut dec_cfg_body = vec![0u8; 13];
        dec_cfg_body.extend_from_slice(&[0x05, 0x02, 0x12, 0x10]);

        let mut es_body = vec![0u8; 3]; // ES_ID + flags
        es_body.push(0x04);
        es_body.push(dec_cfg_body.len() as u8);
        es_body.extend_from_slice(&dec_cfg_body);

        let mut esds = vec![0u8; 4]; // version/flags
        esds.push(0x03);
        esds.push(es_body.len() as u8);
        esds.extend_from_slice(&es_body);

        let asc = parse_esds(&esds).unwrap();
        assert_eq!(asc.object_type, 2);
        assert_eq!(asc.freq_index, 4);
        assert_eq!(asc.channel_config, 2);
    }

    #[test]
    fn flatten_follows_sample_to_chunk_runs() {
        // Two chunks: first holds 2 samples, second 1.
        let sizes = vec![10, 20, 30];
        let chunks = vec![100, 500];
        let stsc = vec![(1, 2), (2, 1)];

        let offsets = flatten_offsets(&sizes, &chunks, &stsc);
        assert_eq!(offsets, vec![100, 110, 500]);
    }

    #[test]
    fn stsz_uniform_sizes_expand() {
        let mut stsz = vec![0u8; 12];
        stsz[4..8].copy_from_slice(&256u32.to_be_bytes());
        stsz[8..12].copy_from_slice(&4u32.to_be_bytes());
        assert_eq!(parse_stsz(&stsz).unwrap(), vec![256; 4]);
    }
}
