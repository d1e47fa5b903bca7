//! The user's station list.
//!
//! Persisted as `name|url|genre|slogan` lines; genre and slogan are
//! optional. The list is capped at [`MAX_STATIONS`] records; extra lines in
//! a hand-edited file are dropped with a warning.

use std::{fs, path::Path};

use tracing::{debug, warn};

use crate::RadioError;

/// Upper bound on persisted stations.
pub const MAX_STATIONS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioStation {
    pub name: String,
    pub url: String,
    pub genre: String,
    pub slogan: String,
}

impl RadioStation {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            genre: String::new(),
            slogan: String::new(),
        }
    }
}

/// Station shipped as the out-of-the-box default.
fn default_stations() -> Vec<RadioStation> {
    vec![RadioStation {
        name: "Hitz FM".into(),
        url: "https://n10.rcs.revma.com/488kt4sbv4uvv/10_xn1quxmoht3902/playlist.m3u8".into(),
        genre: "Pop".into(),
        slogan: "More the Hitz, One the Time".into(),
    }]
}

#[derive(Debug, Clone)]
pub struct StationList {
    stations: Vec<RadioStation>,
    /// True when the list came from (or was saved to) the user's file
    /// rather than the built-in defaults.
    user_stations: bool,
}

impl Default for StationList {
    fn default() -> Self {
        Self {
            stations: default_stations(),
            user_stations: false,
        }
    }
}

impl StationList {
    /// Loads the station file, falling back to the defaults when it is
    /// missing or holds no valid records.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                debug!(path = %path.display(), %err, "no stations file, using defaults");
                return Self::default();
            }
        };

        let mut stations = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if stations.len() >= MAX_STATIONS {
                warn!(max = MAX_STATIONS, "stations file overflows the cap, dropping the rest");
                break;
            }

            let mut fields = line.split('|');
            let name = fields.next().unwrap_or("").trim();
            let url = fields.next().unwrap_or("").trim();
            if name.is_empty() || url.is_empty() {
                warn!(line, "skipping malformed station record");
                continue;
            }
            stations.push(RadioStation {
                name: name.to_string(),
                url: url.to_string(),
                genre: fields.next().unwrap_or("").trim().to_string(),
                slogan: fields.next().unwrap_or("").trim().to_string(),
            });
        }

        if stations.is_empty() {
            return Self::default();
        }
        Self {
            stations,
            user_stations: true,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RadioError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for station in &self.stations {
            out.push_str(&format!(
                "{}|{}|{}|{}\n",
                station.name, station.url, station.genre, station.slogan
            ));
        }
        fs::write(path, out)?;
        Ok(())
    }

    pub fn stations(&self) -> &[RadioStation] {
        &self.stations
    }

    pub fn has_user_stations(&self) -> bool {
        self.user_stations
    }

    /// Adds a station; errors when the list is full.
    pub fn add(&mut self, station: RadioStation) -> Result<(), RadioError> {
        if self.stations.len() >= MAX_STATIONS {
            return Err(RadioError::Stations(format!(
                "station list is full ({MAX_STATIONS} max)"
            )));
        }
        self.stations.push(station);
        self.user_stations = true;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.stations.len() {
            self.stations.remove(index);
            self.user_stations = true;
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.stations.iter().any(|s| s.url == url)
    }

    /// Removes the station with the given URL; returns whether one existed.
    pub fn remove_by_url(&mut self, url: &str) -> bool {
        let before = self.stations.len();
        self.stations.retain(|s| s.url != url);
        let removed = self.stations.len() != before;
        if removed {
            self.user_stations = true;
        }
        removed
    }

    /// Index of the station currently playing, by URL.
    pub fn index_of_url(&self, url: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let list = StationList::load(Path::new("/no/such/stations.txt"));
        assert!(!list.has_user_stations());
        assert_eq!(list.stations().len(), 1);
        assert_eq!(list.stations()[0].name, "Hitz FM");
    }

    #[test]
    fn parses_records_with_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.txt");
        fs::write(
            &path,
            "Jazz24|https://example.com/jazz|Jazz|Smooth around the clock\nTalk|https://example.com/talk\n",
        )
        .unwrap();

        let list = StationList::load(&path);
        assert!(list.has_user_stations());
        assert_eq!(list.stations().len(), 2);
        assert_eq!(list.stations()[0].genre, "Jazz");
        assert_eq!(list.stations()[1].genre, "");
        assert_eq!(list.stations()[1].slogan, "");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.txt");
        fs::write(&path, "# comment\n\nonly-a-name\n|https://no.name\nOk|https://ok\n").unwrap();

        let list = StationList::load(&path);
        assert_eq!(list.stations().len(), 1);
        assert_eq!(list.stations()[0].name, "Ok");
    }

    #[test]
    fn cap_drops_excess_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.txt");
        let mut body = String::new();
        for i in 0..40 {
            body.push_str(&format!("S{i}|https://example.com/{i}\n"));
        }
        fs::write(&path, body).unwrap();

        let list = StationList::load(&path);
        assert_eq!(list.stations().len(), MAX_STATIONS);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radio").join("stations.txt");

        let mut list = StationList::default();
        list.add(RadioStation::new("My Station", "https://example.com/s")).unwrap();
        list.save(&path).unwrap();

        let reloaded = StationList::load(&path);
        assert!(reloaded.contains_url("https://example.com/s"));
        assert_eq!(reloaded.stations().len(), list.stations().len());
    }

    #[test]
    fn remove_by_url_reports_outcome() {
        let mut list = StationList::default();
        list.add(RadioStation::new("A", "https://a")).unwrap();
        assert!(list.remove_by_url("https://a"));
        assert!(!list.remove_by_url("https://a"));
        assert!(!list.contains_url("https://a"));
    }

    #[test]
    fn add_fails_when_full() {
        let mut list = StationList::default();
        for i in list.stations().len()..MAX_STATIONS {
            list.add(RadioStation::new(format!("S{i}"), format!("https://{i}")))
                .unwrap();
        }
        assert!(list.add(RadioStation::new("extra", "https://extra")).is_err());
    }
}
