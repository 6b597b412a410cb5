//! Rescan of directories whose events were dropped
//!
//! When a stream reports must-scan-subdirs, changes below that path were
//! lost. We fall back to an mtime scan to report what changed.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Files below `root` modified after `since`
///
/// Entries that vanish or cannot be read mid-scan are skipped.
pub fn modified_since(root: &Path, since: SystemTime) -> Vec<PathBuf> {
    let mut changed = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry during rescan: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let mtime = match entry.metadata().map(|meta| meta.modified()) {
            Ok(Ok(mtime)) => mtime,
            _ => continue,
        };

        if mtime > since {
            changed.push(entry.into_path());
        }
    }

    changed
}

/// Run the scan on the blocking pool
pub async fn rescan(root: PathBuf, since: SystemTime) -> Result<Vec<PathBuf>> {
    let shown = root.display().to_string();
    let changed = tokio::task::spawn_blocking(move || modified_since(&root, since))
        .await
        .context("Rescan task failed")?;

    info!("Rescan of {} found {} changed files", shown, changed.len());
    Ok(changed)
}
