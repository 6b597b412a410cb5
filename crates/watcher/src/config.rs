//! Subscription configuration
//!
//! `SubscriptionConfig` is the builder used in code; `WatchSettings` is the
//! serde form read from config files.

use crate::error::CreationFailure;
use fsstream_core::{CreateFlags, CreateOption, EventId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the background dispatcher thread
pub const DEFAULT_DISPATCH_THREAD: &str = "fsstream-dispatch";

/// Where the handler runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Dedicated thread, spawned when the subscription is first scheduled
    Background { thread_name: String },
    /// Whatever thread the native source delivers on
    Inline,
}

impl DispatchTarget {
    pub fn background(thread_name: impl Into<String>) -> Self {
        DispatchTarget::Background {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for DispatchTarget {
    fn default() -> Self {
        DispatchTarget::background(DEFAULT_DISPATCH_THREAD)
    }
}

/// Everything needed to create a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Paths to watch (at least one)
    pub paths: Vec<String>,
    /// Replay history from this id; `None` starts from now
    pub since: Option<EventId>,
    /// Minimum delay between native batches
    pub latency: Duration,
    /// Caller-requested create flags
    pub flags: CreateFlags,
    pub dispatch: DispatchTarget,
}

impl SubscriptionConfig {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            since: None,
            latency: Duration::ZERO,
            flags: CreateFlags::empty(),
            dispatch: DispatchTarget::default(),
        }
    }

    pub fn since(mut self, id: EventId) -> Self {
        self.since = Some(id);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn flags(mut self, flags: CreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn dispatch(mut self, target: DispatchTarget) -> Self {
        self.dispatch = target;
        self
    }

    /// Flags actually passed to the native source
    ///
    /// The decoder inspects paths as in-process strings, so use-cf-types is
    /// always on regardless of what the caller asked for.
    pub fn effective_flags(&self) -> CreateFlags {
        self.flags | CreateFlags::USE_CF_TYPES
    }

    /// Start id passed to the native source
    pub fn start_id(&self) -> EventId {
        self.since.unwrap_or(EventId::SINCE_NOW)
    }

    /// Whether historical events were requested
    pub fn replays_history(&self) -> bool {
        !self.start_id().is_since_now()
    }

    pub(crate) fn validate(&self) -> Result<(), CreationFailure> {
        if self.paths.is_empty() {
            return Err(CreationFailure::NoPaths);
        }
        if self.paths.iter().any(|path| path.trim().is_empty()) {
            return Err(CreationFailure::EmptyPath);
        }
        Ok(())
    }
}

/// Dispatch selector in settings files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Background,
    Inline,
}

/// Serializable watch configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSettings {
    #[serde(default)]
    pub paths: Vec<String>,

    /// Resume id; omitted means "from now"
    #[serde(default)]
    pub since: Option<u64>,

    /// Minimum latency in milliseconds (default: 0)
    #[serde(default)]
    pub latency_ms: u64,

    #[serde(default)]
    pub flags: Vec<CreateOption>,

    #[serde(default)]
    pub dispatch: DispatchMode,

    /// Background dispatcher thread name
    #[serde(default)]
    pub thread_name: Option<String>,
}

impl WatchSettings {
    pub fn into_config(self) -> SubscriptionConfig {
        let dispatch = match self.dispatch {
            DispatchMode::Inline => DispatchTarget::Inline,
            DispatchMode::Background => DispatchTarget::background(
                self.thread_name
                    .unwrap_or_else(|| DEFAULT_DISPATCH_THREAD.to_string()),
            ),
        };

        let mut config = SubscriptionConfig::new(self.paths)
            .latency(Duration::from_millis(self.latency_ms))
            .flags(self.flags.into_iter().collect())
            .dispatch(dispatch);
        config.since = self.since.map(EventId);
        config
    }
}
