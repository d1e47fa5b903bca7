//! Audio routing configuration watcher.
//!
//! Bluetooth/USB routing on the device is driven by rewriting `.asoundrc`
//! in the user's home directory. Watching the directory (not the file;
//! the file is replaced, not edited) catches create, modify and delete,
//! and the callback triggers sink re-detection.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::AudioError;

/// File name that controls audio routing.
pub const ROUTING_FILE: &str = ".asoundrc";

/// Keeps the underlying filesystem watcher alive.
pub struct RoutingWatcher {
    _watcher: RecommendedWatcher,
    routing_path: PathBuf,
}

impl RoutingWatcher {
    /// Watches `home_dir` and invokes `on_change` whenever the routing file
    /// is created, modified or removed.
    pub fn new(
        home_dir: &Path,
        on_change: impl Fn() + Send + 'static,
    ) -> Result<Self, AudioError> {
        let routing_path = home_dir.join(ROUTING_FILE);
        let filter_path = routing_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "routing watcher event error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            if event.paths.iter().any(|p| p == &filter_path) {
                debug!("audio routing configuration changed");
                on_change();
            }
        })
        .map_err(|e| AudioError::Watcher(e.to_string()))?;

        watcher
            .watch(home_dir, RecursiveMode::NonRecursive)
            .map_err(|e| AudioError::Watcher(e.to_string()))?;

        Ok(Self {
            _watcher: watcher,
            routing_path,
        })
    }

    /// Path of the watched routing file.
    pub fn routing_path(&self) -> &Path {
        &self.routing_path
    }

    /// Reads the current routing configuration, empty when absent.
    pub fn read_routing_config(&self) -> String {
        std::fs::read_to_string(&self.routing_path).unwrap_or_default()
    }
}
