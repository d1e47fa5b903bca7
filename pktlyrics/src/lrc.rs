//! LRC parsing and the synchronised line index.
//!
//! An LRC line is `[mm:ss.xx]text` with centiseconds, or `[mm:ss.xxx]`
//! with milliseconds. Metadata-only lines (`[ar:...]`, `[ti:...]`, ...)
//! and empty text lines are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub time_ms: u64,
    pub text: String,
}

/// Parses an LRC document into display-ordered lines.
pub fn parse_lrc(text: &str) -> Vec<LyricLine> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let raw = raw.trim();
        if let Some(line) = parse_line(raw) {
            lines.push(line);
        }
    }
    lines
}

fn parse_line(raw: &str) -> Option<LyricLine> {
    let rest = raw.strip_prefix('[')?;
    let close = rest.find(']')?;
    let stamp = &rest[..close];
    let text = rest[close + 1..].trim();
    if text.is_empty() {
        return None;
    }

    let (minutes, seconds_part) = stamp.split_once(':')?;
    let minutes: u64 = minutes.trim().parse().ok()?; // `[ar:...]` fails here

    let (seconds, fraction) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (seconds_part, None),
    };
    let seconds: u64 = seconds.trim().parse().ok()?;

    let fraction_ms = match fraction {
        None => 0,
        Some(f) => {
            let digits: String = f.chars().take_while(|c| c.is_ascii_digit()).collect();
            let value: u64 = digits.parse().ok()?;
            match digits.len() {
                2 => value * 10, // centiseconds
                3 => value,      // milliseconds
                _ => return None,
            }
        }
    };

    Some(LyricLine {
        time_ms: minutes * 60_000 + seconds * 1000 + fraction_ms,
        text: text.to_string(),
    })
}

/// Renders lines back to LRC (centisecond timestamps).
pub fn render_lrc(lines: &[LyricLine]) -> String {
    let mut out = String::new();
    for line in lines {
        let minutes = line.time_ms / 60_000;
        let seconds = (line.time_ms % 60_000) / 1000;
        let centis = (line.time_ms % 1000) / 10;
        out.push_str(&format!(
            "[{minutes:02}:{seconds:02}.{centis:02}]{}\n",
            line.text
        ));
    }
    out
}

/// The display-side index: which line is current at a playback position.
///
/// Lookup is a binary search for the last line with `time_ms <= position`,
/// with a cursor fast path for the monotonic case (normal playback hits it
/// almost every time).
#[derive(Debug, Default)]
pub struct LyricsIndex {
    lines: Vec<LyricLine>,
    cursor: AtomicUsize,
}

impl LyricsIndex {
    pub fn new(lines: Vec<LyricLine>) -> Self {
        Self {
            lines,
            cursor: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    /// The line active at `position_ms`, or `None` before the first line.
    pub fn line_at(&self, position_ms: u64) -> Option<&LyricLine> {
        if self.lines.is_empty() {
            return None;
        }

        // Fast path: the cursor is still the active line.
        let cursor = self.cursor.load(Ordering::Relaxed);
        if cursor < self.lines.len()
            && self.lines[cursor].time_ms <= position_ms
            && self
                .lines
                .get(cursor + 1)
                .map_or(true, |next| next.time_ms > position_ms)
        {
            return Some(&self.lines[cursor]);
        }

        let index = self.search(position_ms)?;
        self.cursor.store(index, Ordering::Relaxed);
        Some(&self.lines[index])
    }

    /// The line after the currently active one.
    pub fn next_line(&self, position_ms: u64) -> Option<&LyricLine> {
        match self.search(position_ms) {
            Some(index) => self.lines.get(index + 1),
            None => self.lines.first(),
        }
    }

    fn search(&self, position_ms: u64) -> Option<usize> {
        let mut lo = 0isize;
        let mut hi = self.lines.len() as isize - 1;
        let mut result = -1isize;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            if self.lines[mid as usize].time_ms <= position_ms {
                result = mid;
                lo = mid + 1;
            } else {
                hi = mid - 1;
            }
        }
        usize::try_from(result).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[ar:The Band]
[ti:The Song]
[00:01.00]First line
[00:05.50]Second line
[01:00.250]Third line

[00:notatime]garbage
plain text line
";

    #[test]
    fn parses_timestamps_and_skips_metadata() {
        let lines = parse_lrc(SAMPLE);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LyricLine { time_ms: 1000, text: "First line".into() });
        assert_eq!(lines[1].time_ms, 5500);
        // Three fractional digits are milliseconds.
        assert_eq!(lines[2].time_ms, 60_250);
    }

    #[test]
    fn round_trips_through_render() {
        let lines = vec![
            LyricLine { time_ms: 1000, text: "Alpha".into() },
            LyricLine { time_ms: 65_430, text: "Beta".into() },
        ];
        assert_eq!(parse_lrc(&render_lrc(&lines)), lines);
    }

    #[test]
    fn lookup_finds_the_active_line() {
        let index = LyricsIndex::new(parse_lrc(SAMPLE));

        assert_eq!(index.line_at(0), None);
        assert_eq!(index.line_at(1000).unwrap().text, "First line");
        assert_eq!(index.line_at(3000).unwrap().text, "First line");
        assert_eq!(index.line_at(5500).unwrap().text, "Second line");
        assert_eq!(index.line_at(120_000).unwrap().text, "Third line");
    }

    #[test]
    fn monotonic_fast_path_matches_search() {
        let index = LyricsIndex::new(parse_lrc(SAMPLE));
        // Walk forward; every position must agree with a fresh search.
        for pos in (0..70_000).step_by(250) {
            let fresh = LyricsIndex::new(parse_lrc(SAMPLE));
            assert_eq!(
                index.line_at(pos).map(|l| l.time_ms),
                fresh.line_at(pos).map(|l| l.time_ms),
                "divergence at {pos}"
            );
        }
        // And a backwards seek still resolves correctly.
        assert_eq!(index.line_at(1200).unwrap().text, "First line");
    }

    #[test]
    fn next_line_previews_the_upcoming_text() {
        let index = LyricsIndex::new(parse_lrc(SAMPLE));
        assert_eq!(index.next_line(0).unwrap().text, "First line");
        assert_eq!(index.next_line(1000).unwrap().text, "Second line");
        assert_eq!(index.next_line(120_000), None);
    }

    #[test]
    fn empty_documents_yield_empty_indexes() {
        let index = LyricsIndex::new(parse_lrc("[ar:Nobody]\n"));
        assert!(index.is_empty());
        assert_eq!(index.line_at(5000), None);
    }
}
