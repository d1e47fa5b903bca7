//! MPEG-TS demultiplexing.
//!
//! Minimal single-program demux: parse the PAT to find the PMT, parse the
//! PMT to find the audio PID (ADTS/LATM AAC or MP1/MP2 audio stream types),
//! then collect that PID's PES payloads. The audio PID is cached across
//! segments of the same stream so only the first segment pays for table
//! parsing.

use tracing::{debug, trace};

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;

/// Audio stream types accepted from the PMT.
fn is_audio_stream_type(stream_type: u8) -> bool {
    // 0x0F ADTS AAC, 0x11 LATM AAC, 0x03/0x04 MPEG-1/2 audio
    matches!(stream_type, 0x0f | 0x11 | 0x03 | 0x04)
}

#[derive(Debug, Default)]
pub struct TsDemuxer {
    pmt_pid: Option<u16>,
    audio_pid: Option<u16>,
    /// Stream type of the audio PID (tells AAC from MP3).
    audio_stream_type: Option<u8>,
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the PMT identified the audio elementary stream.
    pub fn pid_detected(&self) -> bool {
        self.audio_pid.is_some()
    }

    /// PMT stream type of the detected audio PID.
    pub fn audio_stream_type(&self) -> Option<u8> {
        self.audio_stream_type
    }

    /// Forgets the cached PIDs (used when the variant changes).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Extracts the audio elementary stream from one TS buffer into `out`.
    ///
    /// Returns the number of payload bytes appended.
    pub fn demux(&mut self, ts: &[u8], out: &mut Vec<u8>) -> usize {
        let start_len = out.len();
        let mut pos = 0usize;

        while pos + TS_PACKET_SIZE <= ts.len() {
            // Resynchronise when the segment starts mid-packet.
            if ts[pos] != TS_SYNC_BYTE {
                pos += 1;
                continue;
            }
            let pkt = &ts[pos..pos + TS_PACKET_SIZE];
            pos += TS_PACKET_SIZE;

            let pid = ((pkt[1] as u16 & 0x1f) << 8) | pkt[2] as u16;
            let payload_start = pkt[1] & 0x40 != 0;
            let adaptation = (pkt[3] >> 4) & 0x03;

            let mut header_len = 4usize;
            if adaptation == 2 || adaptation == 3 {
                let adapt_len = pkt[4] as usize;
                if adapt_len > TS_PACKET_SIZE - 5 {
                    continue;
                }
                header_len += 1 + adapt_len;
            }
            if adaptation == 2 || header_len >= TS_PACKET_SIZE {
                continue; // no payload
            }
            let payload = &pkt[header_len..];

            if pid == PAT_PID && payload_start && self.audio_pid.is_none() {
                self.parse_pat(payload);
            } else if Some(pid) == self.pmt_pid && payload_start && self.audio_pid.is_none() {
                self.parse_pmt(payload);
            } else if Some(pid) == self.audio_pid {
                extract_pes(payload, payload_start, out);
            }
        }

        out.len() - start_len
    }

    fn parse_pat(&mut self, payload: &[u8]) {
        // Pointer field precedes the section on payload_start packets.
        let Some(&pointer) = payload.first() else { return };
        let section = &payload[(1 + pointer as usize).min(payload.len())..];
        if section.len() < 12 || section[0] != 0x00 {
            return;
        }
        let section_len = ((section[1] as usize & 0x0f) << 8) | section[2] as usize;
        if section_len < 9 {
            return;
        }
        // First program entry sits right after the 8-byte section header.
        let pmt_pid = ((section[10] as u16 & 0x1f) << 8) | section[11] as u16;
        debug!(pmt_pid, "PAT parsed");
        self.pmt_pid = Some(pmt_pid);
    }

    fn parse_pmt(&mut self, payload: &[u8]) {
        let Some(&pointer) = payload.first() else { return };
        let section = &payload[(1 + pointer as usize).min(payload.len())..];
        if section.len() < 13 || section[0] != 0x02 {
            return;
        }
        let section_len = ((section[1] as usize & 0x0f) << 8) | section[2] as usize;
        let program_info_len = ((section[10] as usize & 0x0f) << 8) | section[11] as usize;

        let mut es_pos = 12 + program_info_len;
        // Elementary stream loop runs to the CRC at the section's end.
        let section_end = (3 + section_len).saturating_sub(4).min(section.len());
        while es_pos + 5 <= section_end {
            let stream_type = section[es_pos];
            let es_pid = ((section[es_pos + 1] as u16 & 0x1f) << 8) | section[es_pos + 2] as u16;
            let es_info_len =
                ((section[es_pos + 3] as usize & 0x0f) << 8) | section[es_pos + 4] as usize;

            if is_audio_stream_type(stream_type) {
                debug!(es_pid, stream_type, "audio PID detected");
                self.audio_pid = Some(es_pid);
                self.audio_stream_type = Some(stream_type);
                return;
            }
            es_pos += 5 + es_info_len;
        }
    }
}

/// Appends the audio bytes of one TS payload, skipping the PES header on
/// packets that start a new PES unit.
fn extract_pes(payload: &[u8], payload_start: bool, out: &mut Vec<u8>) {
    if payload_start {
        if payload.len() >= 9 && payload[0] == 0x00 && payload[1] == 0x00 && payload[2] == 0x01 {
            let pes_header_len = 9 + payload[8] as usize;
            if pes_header_len < payload.len() {
                out.extend_from_slice(&payload[pes_header_len..]);
            }
        } else {
            trace!("payload_start without PES start code, dropping packet");
        }
    } else {
        out.extend_from_slice(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packet(pid: u16, payload_start: bool, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; TS_PACKET_SIZE];
        pkt[0] = TS_SYNC_BYTE;
        pkt[1] = ((pid >> 8) as u8 & 0x1f) | if payload_start { 0x40 } else { 0 };
        pkt[2] = (pid & 0xff) as u8;
        pkt[3] = 0x10; // payload only, no adaptation field
        pkt[4..4 + payload.len()].copy_from_slice(payload);
        pkt
    }

    fn pat_payload(pmt_pid: u16) -> Vec<u8> {
        let mut section = vec![
            0x00, // table_id
            0xb0, 0x0d, // section length 13
            0x00, 0x01, // transport stream id
            0xc1, 0x00, 0x00, // version/section numbers
            0x00, 0x01, // program number
            0xe0 | ((pmt_pid >> 8) as u8 & 0x1f),
            (pmt_pid & 0xff) as u8,
        ];
        section.extend_from_slice(&[0, 0, 0, 0]); // CRC placeholder
        let mut payload = vec![0u8]; // pointer field
        payload.extend_from_slice(&section);
        payload
    }

    fn pmt_payload(audio_pid: u16, stream_type: u8) -> Vec<u8> {
        let mut section = vec![
            0x02, // table_id
            0xb0, 0x12, // section length 18
            0x00, 0x01, // program number
            0xc1, 0x00, 0x00, // version/section numbers
            0xe0, 0x00, // PCR PID
            0xf0, 0x00, // program info length 0
            stream_type,
            0xe0 | ((audio_pid >> 8) as u8 & 0x1f),
            (audio_pid & 0xff) as u8,
            0xf0, 0x00, // ES info length 0
        ];
        section.extend_from_slice(&[0, 0, 0, 0]); // CRC placeholder
        let mut payload = vec![0u8];
        payload.extend_from_slice(&section);
        payload
    }

    fn pes_payload(audio: &[u8]) -> Vec<u8> {
        let mut pes = vec![0x00, 0x00, 0x01, 0xc0, 0x00, 0x00, 0x80, 0x00, 0x00];
        pes.extend_from_slice(audio);
        pes
    }

    #[test]
    fn walks_pat_pmt_then_extracts_audio() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&ts_packet(PAT_PID, true, &pat_payload(0x0100)));
        stream.extend_from_slice(&ts_packet(0x0100, true, &pmt_payload(0x0101, 0x0f)));
        stream.extend_from_slice(&ts_packet(0x0101, true, &pes_payload(b"AUDIO-A")));
        stream.extend_from_slice(&ts_packet(0x0101, false, b"AUDIO-B"));

        let mut demux = TsDemuxer::new();
        let mut out = Vec::new();
        demux.demux(&stream, &mut out);

        assert!(demux.pid_detected());
        assert_eq!(demux.audio_stream_type(), Some(0x0f));
        assert!(out.starts_with(b"AUDIO-A"));
        // Continuation payload is carried verbatim (full packet payload).
        assert!(out
            .windows(b"AUDIO-B".len())
            .any(|w| w == b"AUDIO-B"));
    }

    #[test]
    fn cached_pid_survives_across_segments() {
        let mut demux = TsDemuxer::new();
        let mut out = Vec::new();

        let mut first = Vec::new();
        first.extend_from_slice(&ts_packet(PAT_PID, true, &pat_payload(0x0040)));
        first.extend_from_slice(&ts_packet(0x0040, true, &pmt_payload(0x0041, 0x03)));
        demux.demux(&first, &mut out);
        assert!(demux.pid_detected());

        // Second segment: no tables, just audio.
        let second = ts_packet(0x0041, true, &pes_payload(b"MP3DATA"));
        let appended = demux.demux(&second, &mut out);
        assert!(appended > 0);
        assert!(out.windows(7).any(|w| w == b"MP3DATA"));
    }

    #[test]
    fn non_audio_pids_are_ignored() {
        let mut demux = TsDemuxer::new();
        let mut out = Vec::new();
        let stream = ts_packet(0x0200, true, &pes_payload(b"VIDEO"));
        assert_eq!(demux.demux(&stream, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn garbage_prefix_is_skipped_to_sync() {
        let mut stream = vec![0xaa; 10];
        stream.extend_from_slice(&ts_packet(PAT_PID, true, &pat_payload(0x0100)));
        stream.extend_from_slice(&ts_packet(0x0100, true, &pmt_payload(0x0101, 0x0f)));
        stream.extend_from_slice(&ts_packet(0x0101, true, &pes_payload(b"PAYLOAD")));

        let mut demux = TsDemuxer::new();
        let mut out = Vec::new();
        demux.demux(&stream, &mut out);
        assert!(out.starts_with(b"PAYLOAD"));
    }
}
