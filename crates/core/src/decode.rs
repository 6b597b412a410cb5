//! Raw notification -> semantic events
//!
//! A raw notification can signal several independent conditions at once, so
//! decoding walks a fixed priority table and keeps every match instead of
//! picking a single discriminant.

use crate::event::{FsEvent, ItemEvent, ItemType, Origin, ScanReason};
use crate::flags::{CreateFlags, EventFlags, EventId};
use smallvec::{smallvec, SmallVec};
use tracing::warn;

/// One notification as delivered by the native source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: String,
    pub id: EventId,
    pub flags: EventFlags,
}

impl RawEvent {
    pub fn new(path: impl Into<String>, id: EventId, flags: EventFlags) -> Self {
        Self {
            path: path.into(),
            id,
            flags,
        }
    }
}

/// Notifications delivered together in one native callback
pub type RawBatch = Vec<RawEvent>;

/// Decoder output; never empty
pub type Decoded = SmallVec<[FsEvent; 2]>;

/// Values shared by every variant built from one notification
struct Fields<'a> {
    path: &'a str,
    id: EventId,
    flags: EventFlags,
    item_type: ItemType,
    origin: Origin,
}

impl Fields<'_> {
    fn item(&self) -> ItemEvent {
        ItemEvent {
            path: self.path.to_string(),
            item_type: self.item_type,
            id: self.id,
            origin: self.origin,
        }
    }
}

type Build = fn(&Fields<'_>) -> FsEvent;

/// Recognized flags in emission order
const RULES: &[(EventFlags, Build)] = &[
    (EventFlags::MUST_SCAN_SUB_DIRS, |f| FsEvent::MustScanSubdirs {
        path: f.path.to_string(),
        reason: scan_reason(f.flags),
    }),
    (EventFlags::EVENT_IDS_WRAPPED, |_| FsEvent::SequenceIdsWrapped),
    (EventFlags::HISTORY_DONE, |_| FsEvent::HistoryReplayDone),
    (EventFlags::ROOT_CHANGED, |f| FsEvent::RootChanged {
        path: f.path.to_string(),
        origin: f.origin,
    }),
    (EventFlags::MOUNT, |f| FsEvent::VolumeMounted {
        path: f.path.to_string(),
        id: f.id,
        origin: f.origin,
    }),
    (EventFlags::UNMOUNT, |f| FsEvent::VolumeUnmounted {
        path: f.path.to_string(),
        id: f.id,
        origin: f.origin,
    }),
    (EventFlags::ITEM_CREATED, |f| FsEvent::ItemCreated(f.item())),
    (EventFlags::ITEM_REMOVED, |f| FsEvent::ItemRemoved(f.item())),
    (EventFlags::ITEM_INODE_META_MOD, |f| {
        FsEvent::ItemInodeMetadataModified(f.item())
    }),
    (EventFlags::ITEM_RENAMED, |f| FsEvent::ItemRenamed(f.item())),
    (EventFlags::ITEM_MODIFIED, |f| FsEvent::ItemDataModified(f.item())),
    (EventFlags::ITEM_FINDER_INFO_MOD, |f| {
        FsEvent::ItemMetadataTagModified(f.item())
    }),
    (EventFlags::ITEM_CHANGE_OWNER, |f| {
        FsEvent::ItemOwnershipModified(f.item())
    }),
    (EventFlags::ITEM_XATTR_MOD, |f| {
        FsEvent::ItemExtendedAttributeModified(f.item())
    }),
    (EventFlags::ITEM_CLONED, |f| FsEvent::ItemCloned(f.item())),
];

fn scan_reason(flags: EventFlags) -> ScanReason {
    let user = flags.contains(EventFlags::USER_DROPPED);
    let kernel = flags.contains(EventFlags::KERNEL_DROPPED);
    match (user, kernel) {
        (true, false) => ScanReason::UserDropped,
        (false, true) => ScanReason::KernelDropped,
        _ => ScanReason::Unknown,
    }
}

fn item_type(flags: EventFlags) -> ItemType {
    let kind = flags & EventFlags::ITEM_KIND;
    if kind == EventFlags::ITEM_IS_FILE {
        ItemType::File
    } else if kind == EventFlags::ITEM_IS_DIR {
        ItemType::Dir
    } else if kind == EventFlags::ITEM_IS_SYMLINK {
        ItemType::Symlink
    } else if kind == EventFlags::ITEM_IS_HARDLINK {
        ItemType::Hardlink
    } else if kind == EventFlags::ITEM_IS_LAST_HARDLINK {
        ItemType::LastHardlink
    } else {
        ItemType::Unknown
    }
}

/// Stateless flag decoder for one stream
///
/// Identical inputs always decode to identical, identically ordered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoder {
    mark_self: bool,
    item_cloned: bool,
}

impl Decoder {
    /// Decoder for a stream created with `flags`
    pub fn new(flags: CreateFlags) -> Self {
        Self {
            mark_self: flags.contains(CreateFlags::MARK_SELF),
            item_cloned: true,
        }
    }

    /// Whether the platform defines the item-cloned flag
    ///
    /// When it does not, the bit is treated as unrecognized.
    pub fn with_item_cloned(mut self, supported: bool) -> Self {
        self.item_cloned = supported;
        self
    }

    pub fn marks_self(&self) -> bool {
        self.mark_self
    }

    /// Decode one raw notification
    pub fn decode(&self, raw: &RawEvent) -> Decoded {
        // 1. Provenance, then drop the own-event bit
        let origin = if self.mark_self {
            Origin::from_own_event(Some(raw.flags.contains(EventFlags::OWN_EVENT)))
        } else {
            Origin::Unknown
        };
        let flags = raw.flags - EventFlags::OWN_EVENT;

        // 2. Plain per-directory notification
        if flags.is_empty() {
            return smallvec![FsEvent::Generic {
                path: raw.path.clone(),
                id: raw.id,
                origin,
            }];
        }

        // 3. Item kind, shared by every item variant
        let fields = Fields {
            path: &raw.path,
            id: raw.id,
            flags,
            item_type: item_type(flags),
            origin,
        };

        // 4. Every recognized flag, in priority order
        let mut events = Decoded::new();
        for (flag, build) in RULES {
            if *flag == EventFlags::ITEM_CLONED && !self.item_cloned {
                continue;
            }
            if flags.intersects(*flag) {
                events.push(build(&fields));
            }
        }

        // 5. Nothing recognized: fall back, but make the drift visible
        if events.is_empty() {
            warn!(
                "Unrecognized event flags {:#x} for path {} (event {})",
                flags, raw.path, raw.id
            );
            events.push(FsEvent::Generic {
                path: raw.path.clone(),
                id: raw.id,
                origin,
            });
        }

        events
    }

    /// Decode a whole batch, preserving native order
    pub fn decode_batch<'a>(&'a self, batch: &'a [RawEvent]) -> impl Iterator<Item = FsEvent> + 'a {
        batch.iter().flat_map(move |raw| self.decode(raw))
    }
}

/// Decode with a decoder built from the stream's create flags
pub fn decode(raw: &RawEvent, flags: CreateFlags) -> Decoded {
    Decoder::new(flags).decode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(flags: EventFlags) -> RawEvent {
        RawEvent::new("/watched/file", EventId(42), flags)
    }

    fn item(item_type: ItemType, origin: Origin) -> ItemEvent {
        ItemEvent {
            path: "/watched/file".to_string(),
            item_type,
            id: EventId(42),
            origin,
        }
    }

    /// Small deterministic generator for flag patterns
    fn patterns() -> impl Iterator<Item = u32> {
        let singles = (0..32).map(|bit| 1u32 << bit);
        let mut state = 0x9e37_79b9u32;
        let mixed = std::iter::repeat_with(move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        })
        .take(500);
        std::iter::once(0).chain(singles).chain(mixed).chain([u32::MAX])
    }

    #[test]
    fn test_no_flags_is_single_generic() {
        let events = decode(&raw(EventFlags::empty()), CreateFlags::empty());
        assert_eq!(
            events.as_slice(),
            &[FsEvent::Generic {
                path: "/watched/file".to_string(),
                id: EventId(42),
                origin: Origin::Unknown,
            }]
        );
    }

    #[test]
    fn test_decoding_is_total_and_deterministic() {
        for config in [CreateFlags::empty(), CreateFlags::MARK_SELF] {
            let decoder = Decoder::new(config);
            for bits in patterns() {
                let event = raw(EventFlags::from_raw(bits));
                let first = decoder.decode(&event);
                let second = decoder.decode(&event);
                assert!(!first.is_empty(), "empty output for {:#x}", bits);
                assert_eq!(first, second, "non-deterministic output for {:#x}", bits);
            }
        }
    }

    #[test]
    fn test_created_and_inode_modified_are_both_emitted() {
        let flags = EventFlags::ITEM_CREATED
            | EventFlags::ITEM_INODE_META_MOD
            | EventFlags::ITEM_IS_FILE;
        let events = decode(&raw(flags), CreateFlags::empty());
        assert_eq!(
            events.as_slice(),
            &[
                FsEvent::ItemCreated(item(ItemType::File, Origin::Unknown)),
                FsEvent::ItemInodeMetadataModified(item(ItemType::File, Origin::Unknown)),
            ]
        );
    }

    #[test]
    fn test_full_priority_order() {
        let all = EventFlags::all() - EventFlags::OWN_EVENT - EventFlags::ITEM_KIND;
        let kinds: Vec<_> = decode(&raw(all), CreateFlags::empty())
            .iter()
            .map(FsEvent::kind)
            .collect();
        assert_eq!(
            kinds,
            [
                "must_scan_subdirs",
                "sequence_ids_wrapped",
                "history_replay_done",
                "root_changed",
                "volume_mounted",
                "volume_unmounted",
                "item_created",
                "item_removed",
                "item_inode_metadata_modified",
                "item_renamed",
                "item_data_modified",
                "item_metadata_tag_modified",
                "item_ownership_modified",
                "item_extended_attribute_modified",
                "item_cloned",
            ]
        );
    }

    #[test]
    fn test_own_event_only_affects_origin() {
        let flags = EventFlags::ITEM_REMOVED | EventFlags::ITEM_IS_DIR | EventFlags::OWN_EVENT;

        let unmarked = decode(&raw(flags), CreateFlags::empty());
        assert_eq!(
            unmarked.as_slice(),
            &[FsEvent::ItemRemoved(item(ItemType::Dir, Origin::Unknown))]
        );

        let marked = decode(&raw(flags), CreateFlags::MARK_SELF);
        assert_eq!(
            marked.as_slice(),
            &[FsEvent::ItemRemoved(item(ItemType::Dir, Origin::Local))]
        );

        let foreign = decode(&raw(flags - EventFlags::OWN_EVENT), CreateFlags::MARK_SELF);
        assert_eq!(
            foreign.as_slice(),
            &[FsEvent::ItemRemoved(item(ItemType::Dir, Origin::External))]
        );
    }

    #[test]
    fn test_own_event_alone_is_generic() {
        let events = decode(&raw(EventFlags::OWN_EVENT), CreateFlags::MARK_SELF);
        assert_eq!(
            events.as_slice(),
            &[FsEvent::Generic {
                path: "/watched/file".to_string(),
                id: EventId(42),
                origin: Origin::Local,
            }]
        );
    }

    #[test]
    fn test_scan_reason_resolution() {
        let cases = [
            (EventFlags::USER_DROPPED, ScanReason::UserDropped),
            (EventFlags::KERNEL_DROPPED, ScanReason::KernelDropped),
            (
                EventFlags::USER_DROPPED | EventFlags::KERNEL_DROPPED,
                ScanReason::Unknown,
            ),
            (EventFlags::empty(), ScanReason::Unknown),
        ];
        for (extra, reason) in cases {
            let events = decode(&raw(EventFlags::MUST_SCAN_SUB_DIRS | extra), CreateFlags::empty());
            assert_eq!(
                events.as_slice(),
                &[FsEvent::MustScanSubdirs {
                    path: "/watched/file".to_string(),
                    reason,
                }]
            );
        }
    }

    #[test]
    fn test_wrapped_has_no_payload() {
        let events = decode(&raw(EventFlags::EVENT_IDS_WRAPPED), CreateFlags::empty());
        assert_eq!(events.as_slice(), &[FsEvent::SequenceIdsWrapped]);
    }

    #[test]
    fn test_item_type_resolution() {
        let cases = [
            (EventFlags::ITEM_IS_FILE, ItemType::File),
            (EventFlags::ITEM_IS_DIR, ItemType::Dir),
            (EventFlags::ITEM_IS_SYMLINK, ItemType::Symlink),
            (EventFlags::ITEM_IS_HARDLINK, ItemType::Hardlink),
            (EventFlags::ITEM_IS_LAST_HARDLINK, ItemType::LastHardlink),
            (EventFlags::empty(), ItemType::Unknown),
            (EventFlags::ITEM_IS_FILE | EventFlags::ITEM_IS_HARDLINK, ItemType::Unknown),
        ];
        for (kind, expected) in cases {
            let events = decode(&raw(EventFlags::ITEM_MODIFIED | kind), CreateFlags::empty());
            assert_eq!(events[0].item_type(), Some(expected));
        }
    }

    #[test]
    fn test_unrecognized_bits_fall_back_to_generic() {
        for bits in [0x8000_0000u32, EventFlags::ITEM_IS_FILE.bits(), EventFlags::USER_DROPPED.bits()] {
            let events = decode(&raw(EventFlags::from_raw(bits)), CreateFlags::empty());
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind(), "generic");
            assert_eq!(events[0].id(), Some(EventId(42)));
        }
    }

    #[test]
    fn test_item_cloned_requires_platform_support() {
        let flags = EventFlags::ITEM_CLONED | EventFlags::ITEM_IS_FILE;

        let supported = Decoder::new(CreateFlags::empty()).decode(&raw(flags));
        assert_eq!(
            supported.as_slice(),
            &[FsEvent::ItemCloned(item(ItemType::File, Origin::Unknown))]
        );

        let legacy = Decoder::new(CreateFlags::empty())
            .with_item_cloned(false)
            .decode(&raw(flags));
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].kind(), "generic");
    }

    #[test]
    fn test_decode_batch_preserves_order() {
        let batch = vec![
            RawEvent::new("/a", EventId(1), EventFlags::ITEM_CREATED | EventFlags::ITEM_MODIFIED),
            RawEvent::new("/b", EventId(2), EventFlags::empty()),
        ];
        let decoder = Decoder::new(CreateFlags::empty());
        let decoded: Vec<_> = decoder
            .decode_batch(&batch)
            .map(|event| (event.kind(), event.path().map(str::to_string)))
            .collect();
        assert_eq!(
            decoded,
            [
                ("item_created", Some("/a".to_string())),
                ("item_data_modified", Some("/a".to_string())),
                ("generic", Some("/b".to_string())),
            ]
        );
    }
}
