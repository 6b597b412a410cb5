//! CLI settings file
//!
//! ```toml
//! [watch]
//! paths = ["/srv/data"]
//! latency_ms = 200
//! flags = ["file-events", "no-defer"]
//!
//! [output]
//! json = true
//! bookmark = "/var/lib/fsstream/bookmark.json"
//! rescan = true
//! ```

use anyhow::{Context, Result};
use fsstream_watcher::WatchSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliSettings {
    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

/// How deliveries are reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// Print JSON lines instead of colored text
    #[serde(default)]
    pub json: bool,

    /// File holding the last seen event id
    #[serde(default)]
    pub bookmark: Option<PathBuf>,

    /// Walk directories flagged for rescanning
    #[serde(default)]
    pub rescan: bool,
}

impl CliSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
