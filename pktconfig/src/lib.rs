//! # PKTMusic Configuration Module
//!
//! This crate holds everything the player persists outside the music files
//! themselves:
//! - The `settings.cfg` key=value store with typed accessors
//! - The filesystem layout (music root, caches, stations file)
//!
//! ## Usage
//!
//! ```no_run
//! use pktconfig::{Paths, Settings};
//!
//! let paths = Paths::resolve()?;
//! let mut settings = Settings::load(&paths.settings_file());
//!
//! // Typed access to validated values
//! let cutoff = settings.bass_filter.cutoff_hz();
//!
//! // Cycle through the allowed values (as the settings UI does)
//! settings.soft_limiter = settings.soft_limiter.next();
//! settings.save(&paths.settings_file())?;
//! # Ok::<(), pktconfig::ConfigError>(())
//! ```

use std::{io, path::PathBuf};

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{BassFilter, ScreenOffTimeout, Settings, SoftLimiter};

/// Errors raised while resolving directories or persisting settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot determine a home directory for this process")]
    NoHomeDir,
    #[error("settings directory {path} is not writable: {source}")]
    DirNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
