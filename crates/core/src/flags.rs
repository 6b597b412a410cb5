//! Raw flag bitsets exchanged with the native notification source
//!
//! Bit values match the FSEvents ABI so raw values can be passed through
//! unchanged on macOS; other backends synthesize the same bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

bitflags! {
    /// Per-notification flags reported by the native source
    ///
    /// Bits this crate does not know about are retained, never truncated,
    /// so the decoder can notice them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        const MUST_SCAN_SUB_DIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const ITEM_INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const ITEM_IS_FILE = 0x0001_0000;
        const ITEM_IS_DIR = 0x0002_0000;
        const ITEM_IS_SYMLINK = 0x0004_0000;
        const OWN_EVENT = 0x0008_0000;
        const ITEM_IS_HARDLINK = 0x0010_0000;
        const ITEM_IS_LAST_HARDLINK = 0x0020_0000;
        const ITEM_CLONED = 0x0040_0000;
    }
}

impl EventFlags {
    /// The mutually exclusive item-kind sub-bits
    pub const ITEM_KIND: Self = Self::ITEM_IS_FILE
        .union(Self::ITEM_IS_DIR)
        .union(Self::ITEM_IS_SYMLINK)
        .union(Self::ITEM_IS_HARDLINK)
        .union(Self::ITEM_IS_LAST_HARDLINK);

    /// Wrap a raw native value, keeping every bit
    pub const fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Bits set in this value that have no named flag
    pub fn unknown_bits(&self) -> u32 {
        self.bits() & !Self::all().bits()
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Flags a stream is created with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateFlags: u32 {
        /// Deliver paths as in-process objects. Always forced on.
        const USE_CF_TYPES = 0x0000_0001;
        const NO_DEFER = 0x0000_0002;
        const WATCH_ROOT = 0x0000_0004;
        const IGNORE_SELF = 0x0000_0008;
        const FILE_EVENTS = 0x0000_0010;
        const MARK_SELF = 0x0000_0020;
        const USE_EXTENDED_DATA = 0x0000_0040;
        const FULL_HISTORY = 0x0000_0080;
    }
}

impl Default for CreateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<CreateOption> for CreateFlags {
    fn from_iter<T: IntoIterator<Item = CreateOption>>(iter: T) -> Self {
        iter.into_iter()
            .fold(CreateFlags::empty(), |flags, option| flags | option.flag())
    }
}

/// Caller-facing name of a configurable create flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreateOption {
    MarkSelf,
    IgnoreSelf,
    WatchRoot,
    #[serde(alias = "file-granularity-events")]
    FileEvents,
    NoDefer,
    FullHistory,
    UseExtendedData,
}

impl CreateOption {
    /// Every option, in bit order of the underlying flags
    pub const ALL: [CreateOption; 7] = [
        CreateOption::NoDefer,
        CreateOption::WatchRoot,
        CreateOption::IgnoreSelf,
        CreateOption::FileEvents,
        CreateOption::MarkSelf,
        CreateOption::UseExtendedData,
        CreateOption::FullHistory,
    ];

    /// The create flag this option sets
    pub fn flag(self) -> CreateFlags {
        match self {
            CreateOption::MarkSelf => CreateFlags::MARK_SELF,
            CreateOption::IgnoreSelf => CreateFlags::IGNORE_SELF,
            CreateOption::WatchRoot => CreateFlags::WATCH_ROOT,
            CreateOption::FileEvents => CreateFlags::FILE_EVENTS,
            CreateOption::NoDefer => CreateFlags::NO_DEFER,
            CreateOption::FullHistory => CreateFlags::FULL_HISTORY,
            CreateOption::UseExtendedData => CreateFlags::USE_EXTENDED_DATA,
        }
    }

    /// Kebab-case name, as accepted by `from_str`
    pub fn name(self) -> &'static str {
        match self {
            CreateOption::MarkSelf => "mark-self",
            CreateOption::IgnoreSelf => "ignore-self",
            CreateOption::WatchRoot => "watch-root",
            CreateOption::FileEvents => "file-events",
            CreateOption::NoDefer => "no-defer",
            CreateOption::FullHistory => "full-history",
            CreateOption::UseExtendedData => "use-extended-data",
        }
    }
}

impl fmt::Display for CreateOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized create option name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stream option '{0}' (expected one of: mark-self, ignore-self, watch-root, file-events, no-defer, full-history, use-extended-data)")]
pub struct UnknownOption(pub String);

impl FromStr for CreateOption {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if normalized == "file-granularity-events" {
            return Ok(CreateOption::FileEvents);
        }
        CreateOption::ALL
            .into_iter()
            .find(|option| option.name() == normalized)
            .ok_or_else(|| UnknownOption(s.to_string()))
    }
}

/// Position of a notification in a device's change history
///
/// Monotonically increasing, 64 bits wide, and may wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    /// Native sentinel meaning "start from now"
    pub const SINCE_NOW: EventId = EventId(u64::MAX);

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_since_now(self) -> bool {
        self == Self::SINCE_NOW
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        EventId(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_since_now() {
            f.write_str("now")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_flags_keep_unknown_bits() {
        let flags = EventFlags::from_raw(0x8000_0100);
        assert!(flags.contains(EventFlags::ITEM_CREATED));
        assert_eq!(flags.bits(), 0x8000_0100);
        assert_eq!(flags.unknown_bits(), 0x8000_0000);
    }

    #[test]
    fn test_event_flags_format_as_hex() {
        let flags = EventFlags::from_raw(0x0001_0100);
        assert_eq!(format!("{:#x}", flags), "0x10100");
        assert_eq!(format!("{:x}", EventFlags::from_raw(0x8000_0000)), "80000000");
    }

    #[test]
    fn test_item_kind_mask() {
        assert_eq!(EventFlags::ITEM_KIND.bits(), 0x0037_0000);
        assert!(!EventFlags::ITEM_KIND.contains(EventFlags::OWN_EVENT));
    }

    #[test]
    fn test_create_option_parsing() {
        assert_eq!("no-defer".parse::<CreateOption>(), Ok(CreateOption::NoDefer));
        assert_eq!("MARK_SELF".parse::<CreateOption>(), Ok(CreateOption::MarkSelf));
        assert_eq!(
            "file-granularity-events".parse::<CreateOption>(),
            Ok(CreateOption::FileEvents)
        );
        assert!("use-cf-types".parse::<CreateOption>().is_err());
        assert!("bogus".parse::<CreateOption>().is_err());
    }

    #[test]
    fn test_create_options_collect_into_flags() {
        let flags: CreateFlags = [CreateOption::NoDefer, CreateOption::FileEvents]
            .into_iter()
            .collect();
        assert_eq!(flags, CreateFlags::NO_DEFER | CreateFlags::FILE_EVENTS);

        for option in CreateOption::ALL {
            assert_eq!(option.name().parse::<CreateOption>(), Ok(option));
            assert!(!option.flag().contains(CreateFlags::USE_CF_TYPES));
        }
    }

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId::SINCE_NOW.to_string(), "now");
        assert_eq!(EventId(42).to_string(), "42");
        assert!(EventId(u64::MAX).is_since_now());
    }
}
