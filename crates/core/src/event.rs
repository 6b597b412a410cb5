//! Semantic event taxonomy
//!
//! Every value is plain data, fully determined at construction.

use crate::flags::EventId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a change was caused by the watching process itself
///
/// Only `Local` or `External` when the stream was created with mark-self;
/// otherwise always `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    External,
    Unknown,
}

impl Origin {
    /// Tri-state from an optional boolean (`None` = not tracked)
    pub fn from_own_event(own: Option<bool>) -> Self {
        match own {
            Some(true) => Origin::Local,
            Some(false) => Origin::External,
            None => Origin::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != Origin::Unknown
    }
}

/// Kind of filesystem item an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Dir,
    Symlink,
    Hardlink,
    LastHardlink,
    Unknown,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Dir => "dir",
            ItemType::Symlink => "symlink",
            ItemType::Hardlink => "hardlink",
            ItemType::LastHardlink => "last_hardlink",
            ItemType::Unknown => "unknown",
        }
    }
}

/// Why events below a path may have been lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    /// The watching process fell behind
    UserDropped,
    /// The kernel dropped events
    KernelDropped,
    Unknown,
}

/// Payload shared by every per-item variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemEvent {
    pub path: String,
    pub item_type: ItemType,
    pub id: EventId,
    pub origin: Origin,
}

/// A decoded change notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsEvent {
    /// No recognized flag; usually a coalesced per-directory notification
    Generic {
        path: String,
        id: EventId,
        origin: Origin,
    },
    /// Rescan `path` recursively, events below it may have been lost
    MustScanSubdirs { path: String, reason: ScanReason },
    /// The sequence counter wrapped. Persisted resume ids are invalid and the
    /// device identity must be re-fetched before history can be correlated.
    SequenceIdsWrapped,
    /// End of replayed history; everything after this is live
    HistoryReplayDone,
    /// The watched root itself moved or was replaced
    RootChanged { path: String, origin: Origin },
    VolumeMounted {
        path: String,
        id: EventId,
        origin: Origin,
    },
    VolumeUnmounted {
        path: String,
        id: EventId,
        origin: Origin,
    },
    ItemCreated(ItemEvent),
    ItemRemoved(ItemEvent),
    ItemInodeMetadataModified(ItemEvent),
    /// Either the old or the new name of a renamed item; which one is not
    /// reported and the two halves carry no ordering guarantee.
    ItemRenamed(ItemEvent),
    ItemDataModified(ItemEvent),
    ItemMetadataTagModified(ItemEvent),
    ItemOwnershipModified(ItemEvent),
    ItemExtendedAttributeModified(ItemEvent),
    ItemCloned(ItemEvent),
}

impl FsEvent {
    /// Stable snake_case name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            FsEvent::Generic { .. } => "generic",
            FsEvent::MustScanSubdirs { .. } => "must_scan_subdirs",
            FsEvent::SequenceIdsWrapped => "sequence_ids_wrapped",
            FsEvent::HistoryReplayDone => "history_replay_done",
            FsEvent::RootChanged { .. } => "root_changed",
            FsEvent::VolumeMounted { .. } => "volume_mounted",
            FsEvent::VolumeUnmounted { .. } => "volume_unmounted",
            FsEvent::ItemCreated(_) => "item_created",
            FsEvent::ItemRemoved(_) => "item_removed",
            FsEvent::ItemInodeMetadataModified(_) => "item_inode_metadata_modified",
            FsEvent::ItemRenamed(_) => "item_renamed",
            FsEvent::ItemDataModified(_) => "item_data_modified",
            FsEvent::ItemMetadataTagModified(_) => "item_metadata_tag_modified",
            FsEvent::ItemOwnershipModified(_) => "item_ownership_modified",
            FsEvent::ItemExtendedAttributeModified(_) => "item_extended_attribute_modified",
            FsEvent::ItemCloned(_) => "item_cloned",
        }
    }

    /// Per-item payload, for the item variants
    pub fn item(&self) -> Option<&ItemEvent> {
        match self {
            FsEvent::ItemCreated(item)
            | FsEvent::ItemRemoved(item)
            | FsEvent::ItemInodeMetadataModified(item)
            | FsEvent::ItemRenamed(item)
            | FsEvent::ItemDataModified(item)
            | FsEvent::ItemMetadataTagModified(item)
            | FsEvent::ItemOwnershipModified(item)
            | FsEvent::ItemExtendedAttributeModified(item)
            | FsEvent::ItemCloned(item) => Some(item),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            FsEvent::Generic { path, .. }
            | FsEvent::MustScanSubdirs { path, .. }
            | FsEvent::RootChanged { path, .. }
            | FsEvent::VolumeMounted { path, .. }
            | FsEvent::VolumeUnmounted { path, .. } => Some(path),
            FsEvent::SequenceIdsWrapped | FsEvent::HistoryReplayDone => None,
            other => other.item().map(|item| item.path.as_str()),
        }
    }

    /// Sequence id, for the variants that define one
    pub fn id(&self) -> Option<EventId> {
        match self {
            FsEvent::Generic { id, .. }
            | FsEvent::VolumeMounted { id, .. }
            | FsEvent::VolumeUnmounted { id, .. } => Some(*id),
            other => other.item().map(|item| item.id),
        }
    }

    pub fn origin(&self) -> Origin {
        match self {
            FsEvent::Generic { origin, .. }
            | FsEvent::RootChanged { origin, .. }
            | FsEvent::VolumeMounted { origin, .. }
            | FsEvent::VolumeUnmounted { origin, .. } => *origin,
            other => other.item().map_or(Origin::Unknown, |item| item.origin),
        }
    }

    pub fn item_type(&self) -> Option<ItemType> {
        self.item().map(|item| item.item_type)
    }
}

impl fmt::Display for FsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())?;
        match self {
            FsEvent::MustScanSubdirs { path, reason } => write!(f, " {} ({:?})", path, reason),
            _ => {
                if let Some(item_type) = self.item_type() {
                    write!(f, " {}", item_type.as_str())?;
                }
                if let Some(path) = self.path() {
                    write!(f, " {}", path)?;
                }
                if let Some(id) = self.id() {
                    write!(f, " #{}", id)?;
                }
                match self.origin() {
                    Origin::Local => f.write_str(" [local]"),
                    Origin::External => f.write_str(" [external]"),
                    Origin::Unknown => Ok(()),
                }
            }
        }
    }
}
