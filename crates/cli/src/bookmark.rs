//! Persisted resume point
//!
//! The watcher itself never persists anything; the CLI records the last id
//! it printed so a later run can replay from there with `since`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fsstream_core::{EventId, FsEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub last_event_id: EventId,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(last_event_id: EventId) -> Self {
        Self {
            last_event_id,
            updated_at: Utc::now(),
        }
    }

    /// Read a bookmark; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bookmark {}", path.display()))?;
        let bookmark = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt bookmark {}", path.display()))?;
        Ok(Some(bookmark))
    }

    /// Write atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write bookmark {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace bookmark {}", path.display()))?;
        Ok(())
    }

    pub fn discard(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove bookmark {}", path.display()))
            }
        }
    }
}

/// Follows deliveries and keeps the bookmark file current
pub struct BookmarkWriter {
    path: PathBuf,
    last: Option<EventId>,
    dirty: bool,
}

impl BookmarkWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last: None,
            dirty: false,
        }
    }

    pub fn last(&self) -> Option<EventId> {
        self.last
    }

    pub fn observe(&mut self, event: &FsEvent) -> Result<()> {
        if let FsEvent::SequenceIdsWrapped = event {
            warn!(
                "Event ids wrapped; discarding bookmark {}. Re-fetch the device identity before replaying history.",
                self.path.display()
            );
            Bookmark::discard(&self.path)?;
            self.last = None;
            self.dirty = false;
            return Ok(());
        }

        let Some(id) = event.id() else {
            return Ok(());
        };
        if id.get() == 0 || id.is_since_now() {
            return Ok(());
        }
        if self.last.map_or(true, |last| id > last) {
            self.last = Some(id);
            self.dirty = true;
        }
        Ok(())
    }

    /// Write the bookmark if anything changed since the last flush
    pub fn flush(&mut self) -> Result<()> {
        let Some(last) = self.last else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        Bookmark::new(last).save(&self.path)?;
        self.dirty = false;
        debug!("Bookmark at event {}", last);
        Ok(())
    }
}
