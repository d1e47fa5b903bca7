//! The `settings.cfg` store.
//!
//! The file is a flat list of `key=value` lines. Values outside the allowed
//! set for a key are ignored on load so a hand-edited file can never put the
//! player into a state the DSP chain does not support.

use std::{fs, path::Path};

use tracing::{debug, warn};

use crate::ConfigError;

/// Auto screen-off delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenOffTimeout {
    Off,
    #[default]
    S60,
    S90,
    S120,
}

impl ScreenOffTimeout {
    const ORDER: [ScreenOffTimeout; 4] = [Self::S60, Self::S90, Self::S120, Self::Off];

    pub fn from_raw(seconds: u32) -> Option<Self> {
        match seconds {
            0 => Some(Self::Off),
            60 => Some(Self::S60),
            90 => Some(Self::S90),
            120 => Some(Self::S120),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::S60 => 60,
            Self::S90 => 90,
            Self::S120 => 120,
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ORDER, self, 1)
    }

    pub fn prev(self) -> Self {
        cycle(&Self::ORDER, self, -1)
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::S60 => "60s",
            Self::S90 => "90s",
            Self::S120 => "120s",
        }
    }
}

/// High-pass cutoff applied on the built-in speaker.
///
/// Represented as an enum rather than a raw Hz value so consumers can detect
/// an actual change and recompute biquad coefficients only then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BassFilter {
    Off,
    Hz80,
    Hz100,
    #[default]
    Hz120,
    Hz150,
    Hz200,
}

impl BassFilter {
    const ORDER: [BassFilter; 6] = [
        Self::Off,
        Self::Hz80,
        Self::Hz100,
        Self::Hz120,
        Self::Hz150,
        Self::Hz200,
    ];

    pub fn from_raw(hz: u32) -> Option<Self> {
        match hz {
            0 => Some(Self::Off),
            80 => Some(Self::Hz80),
            100 => Some(Self::Hz100),
            120 => Some(Self::Hz120),
            150 => Some(Self::Hz150),
            200 => Some(Self::Hz200),
            _ => None,
        }
    }

    /// Cutoff in Hz, `None` when the filter is disabled.
    pub fn cutoff_hz(self) -> Option<f32> {
        match self {
            Self::Off => None,
            Self::Hz80 => Some(80.0),
            Self::Hz100 => Some(100.0),
            Self::Hz120 => Some(120.0),
            Self::Hz150 => Some(150.0),
            Self::Hz200 => Some(200.0),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Hz80 => 80,
            Self::Hz100 => 100,
            Self::Hz120 => 120,
            Self::Hz150 => 150,
            Self::Hz200 => 200,
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ORDER, self, 1)
    }

    pub fn prev(self) -> Self {
        cycle(&Self::ORDER, self, -1)
    }

    pub fn display(self) -> String {
        match self {
            Self::Off => "Off".to_string(),
            other => format!("{} Hz", other.raw()),
        }
    }
}

/// Soft limiter strength for the built-in speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftLimiter {
    Off,
    Mild,
    #[default]
    Medium,
    Strong,
}

impl SoftLimiter {
    const ORDER: [SoftLimiter; 4] = [Self::Off, Self::Mild, Self::Medium, Self::Strong];

    pub fn from_raw(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Mild),
            2 => Some(Self::Medium),
            3 => Some(Self::Strong),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Mild => 1,
            Self::Medium => 2,
            Self::Strong => 3,
        }
    }

    /// Limiter knee threshold, `None` when off.
    pub fn threshold(self) -> Option<f32> {
        match self {
            Self::Off => None,
            Self::Mild => Some(0.7),
            Self::Medium => Some(0.6),
            Self::Strong => Some(0.5),
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ORDER, self, 1)
    }

    pub fn prev(self) -> Self {
        cycle(&Self::ORDER, self, -1)
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Mild => "Mild",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
        }
    }
}

fn cycle<T: Copy + PartialEq>(order: &[T], current: T, step: isize) -> T {
    let len = order.len() as isize;
    let idx = order
        .iter()
        .position(|v| *v == current)
        .unwrap_or(0) as isize;
    order[((idx + step).rem_euclid(len)) as usize]
}

/// Player settings, persisted as `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub screen_off: ScreenOffTimeout,
    pub lyrics_enabled: bool,
    pub bass_filter: BassFilter,
    pub soft_limiter: SoftLimiter,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            screen_off: ScreenOffTimeout::default(),
            lyrics_enabled: true,
            bass_filter: BassFilter::default(),
            soft_limiter: SoftLimiter::default(),
        }
    }
}

impl Settings {
    fn builtin() -> Self {
        Self::default()
    }

    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing or a value is out of range.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(err) => {
                debug!(path = %path.display(), %err, "no settings file, using defaults");
                Self::builtin()
            }
        }
    }

    /// Parses the `key=value` body of a settings file.
    pub fn parse(content: &str) -> Self {
        let mut settings = Self::builtin();

        for line in content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u32>() else {
                warn!(key, value, "ignoring non-numeric settings value");
                continue;
            };

            match key.trim() {
                "screen_off_timeout" => {
                    if let Some(v) = ScreenOffTimeout::from_raw(value) {
                        settings.screen_off = v;
                    }
                }
                "lyrics_enabled" => settings.lyrics_enabled = value != 0,
                "bass_filter_hz" => {
                    if let Some(v) = BassFilter::from_raw(value) {
                        settings.bass_filter = v;
                    }
                }
                "soft_limiter" => {
                    if let Some(v) = SoftLimiter::from_raw(value) {
                        settings.soft_limiter = v;
                    }
                }
                _ => {}
            }
        }

        settings
    }

    /// Serialises the settings back to the file format.
    pub fn render(&self) -> String {
        format!(
            "screen_off_timeout={}\nlyrics_enabled={}\nbass_filter_hz={}\nsoft_limiter={}\n",
            self.screen_off.raw(),
            u32::from(self.lyrics_enabled),
            self.bass_filter.raw(),
            self.soft_limiter.raw(),
        )
    }

    /// Writes the settings to `path`, creating parent directories first.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_known_keys() {
        let settings = Settings::parse(
            "screen_off_timeout=90\nlyrics_enabled=0\nbass_filter_hz=200\nsoft_limiter=1\n",
        );
        assert_eq!(settings.screen_off, ScreenOffTimeout::S90);
        assert!(!settings.lyrics_enabled);
        assert_eq!(settings.bass_filter, BassFilter::Hz200);
        assert_eq!(settings.soft_limiter, SoftLimiter::Mild);
    }

    #[test]
    fn parse_rejects_out_of_range_values() {
        let settings = Settings::parse("screen_off_timeout=45\nbass_filter_hz=60\nsoft_limiter=9\n");
        assert_eq!(settings, Settings::builtin());
    }

    #[test]
    fn parse_ignores_garbage_lines() {
        let settings = Settings::parse("# comment\n\nnot a setting\nlyrics_enabled=1\n");
        assert!(settings.lyrics_enabled);
    }

    #[test]
    fn render_round_trips() {
        let mut settings = Settings::builtin();
        settings.screen_off = ScreenOffTimeout::Off;
        settings.bass_filter = BassFilter::Hz80;
        settings.soft_limiter = SoftLimiter::Strong;
        settings.lyrics_enabled = false;

        assert_eq!(Settings::parse(&settings.render()), settings);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music-player").join("settings.cfg");

        let mut settings = Settings::builtin();
        settings.soft_limiter = SoftLimiter::Off;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn cycle_wraps_both_directions() {
        assert_eq!(ScreenOffTimeout::Off.next(), ScreenOffTimeout::S60);
        assert_eq!(ScreenOffTimeout::S60.prev(), ScreenOffTimeout::Off);
        assert_eq!(BassFilter::Hz200.next(), BassFilter::Off);
        assert_eq!(SoftLimiter::Off.prev(), SoftLimiter::Strong);
    }

    #[test]
    fn limiter_thresholds_match_strength() {
        assert_eq!(SoftLimiter::Off.threshold(), None);
        assert_eq!(SoftLimiter::Mild.threshold(), Some(0.7));
        assert_eq!(SoftLimiter::Medium.threshold(), Some(0.6));
        assert_eq!(SoftLimiter::Strong.threshold(), Some(0.5));
    }
}
