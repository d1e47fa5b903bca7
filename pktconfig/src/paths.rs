//! Filesystem layout shared by the whole player.
//!
//! Two roots exist on the device: the SD card (music library and caches) and
//! the shared userdata directory (settings, radio stations). Both can be
//! overridden, which the tests use to point everything at a temp directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ConfigError;

const ENV_SDCARD: &str = "PKTMUSIC_SDCARD";
const ENV_USERDATA: &str = "PKTMUSIC_USERDATA";

/// Resolved filesystem layout.
#[derive(Debug, Clone)]
pub struct Paths {
    sdcard: PathBuf,
    userdata: PathBuf,
}

impl Paths {
    /// Resolves the two roots, preferring environment overrides, then the
    /// home directory.
    pub fn resolve() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;

        let sdcard = std::env::var_os(ENV_SDCARD)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("sdcard"));
        let userdata = std::env::var_os(ENV_USERDATA)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".userdata"));

        Ok(Self { sdcard, userdata })
    }

    /// Builds a layout rooted at explicit directories.
    pub fn with_roots(sdcard: impl Into<PathBuf>, userdata: impl Into<PathBuf>) -> Self {
        Self {
            sdcard: sdcard.into(),
            userdata: userdata.into(),
        }
    }

    /// Music library root on the SD card.
    pub fn music_dir(&self) -> PathBuf {
        self.sdcard.join("Music")
    }

    /// Album-art disk cache directory.
    pub fn album_art_cache_dir(&self) -> PathBuf {
        self.sdcard.join(".cache").join("albumart")
    }

    /// Lyrics (`.lrc`) disk cache directory.
    pub fn lyrics_cache_dir(&self) -> PathBuf {
        self.sdcard.join(".cache").join("lyrics")
    }

    /// User radio stations file (`name|url|genre|slogan` per line).
    pub fn stations_file(&self) -> PathBuf {
        self.userdata
            .join("music-player")
            .join("radio")
            .join("stations.txt")
    }

    /// Directory holding the curated per-country station catalogues.
    pub fn curated_stations_dir(&self) -> PathBuf {
        PathBuf::from("stations")
    }

    /// Player settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.userdata.join("music-player").join("settings.cfg")
    }

    /// Creates the writable directories and verifies the settings directory
    /// accepts writes. Init fails hard when it does not.
    pub fn ensure_writable(&self) -> Result<(), ConfigError> {
        for dir in [
            self.album_art_cache_dir(),
            self.lyrics_cache_dir(),
            self.userdata.join("music-player").join("radio"),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Self::probe_write(&self.userdata.join("music-player"))?;
        Ok(())
    }

    fn probe_write(dir: &Path) -> Result<(), ConfigError> {
        let probe = dir.join(".write_test");
        fs::write(&probe, b"test").map_err(|source| ConfigError::DirNotWritable {
            path: dir.to_path_buf(),
            source,
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_derives_from_roots() {
        let paths = Paths::with_roots("/mnt/sdcard", "/mnt/userdata");
        assert_eq!(
            paths.album_art_cache_dir(),
            PathBuf::from("/mnt/sdcard/.cache/albumart")
        );
        assert_eq!(
            paths.stations_file(),
            PathBuf::from("/mnt/userdata/music-player/radio/stations.txt")
        );
        assert_eq!(
            paths.settings_file(),
            PathBuf::from("/mnt/userdata/music-player/settings.cfg")
        );
    }

    #[test]
    fn ensure_writable_creates_cache_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::with_roots(tmp.path().join("sd"), tmp.path().join("user"));

        paths.ensure_writable().unwrap();

        assert!(paths.album_art_cache_dir().is_dir());
        assert!(paths.lyrics_cache_dir().is_dir());
        assert!(paths.stations_file().parent().unwrap().is_dir());
    }
}
