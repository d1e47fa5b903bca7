//! Curated per-country station catalogues.
//!
//! Shipped as JSON files next to the application
//! (`stations/<country>.json`), one catalogue per country:
//!
//! ```json
//! {
//!   "country": "Germany",
//!   "code": "de",
//!   "stations": [
//!     { "name": "Deutschlandfunk", "url": "https://...", "genre": "News" }
//!   ]
//! }
//! ```

use std::{fs, path::Path};

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CuratedStation {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub slogan: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CuratedCatalogue {
    pub country: String,
    pub code: String,
    pub stations: Vec<CuratedStation>,
}

/// Loads every `*.json` catalogue under `dir`, sorted by country name.
/// Unreadable or malformed files are skipped with a warning.
pub fn load_catalogues(dir: &Path) -> Vec<CuratedCatalogue> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut catalogues = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|body| serde_json::from_str::<CuratedCatalogue>(&body).map_err(|e| e.to_string()))
        {
            Ok(catalogue) => catalogues.push(catalogue),
            Err(err) => warn!(path = %path.display(), %err, "skipping bad catalogue file"),
        }
    }

    catalogues.sort_by(|a, b| a.country.cmp(&b.country));
    catalogues
}
