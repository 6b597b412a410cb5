//! Seam between the subscription lifecycle and the OS notification source
//!
//! A `NativeSource` allocates streams; a `NativeStream` is one exclusively
//! owned native handle. Dropping the boxed stream releases the handle, which
//! the lifecycle does exactly once.

use crate::config::SubscriptionConfig;
use crate::dispatch::BatchSink;
use crate::error::CreationFailure;
use fsstream_core::{CreateFlags, EventId};
use std::time::Duration;

/// Parameters for one native stream
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub paths: &'a [String],
    /// Already mapped to the native now-sentinel when no replay was asked for
    pub since: EventId,
    pub latency: Duration,
    /// Effective flags, use-cf-types included
    pub flags: CreateFlags,
}

impl<'a> StreamRequest<'a> {
    pub fn from_config(config: &'a SubscriptionConfig) -> Self {
        Self {
            paths: &config.paths,
            since: config.start_id(),
            latency: config.latency,
            flags: config.effective_flags(),
        }
    }
}

/// Factory for native streams
pub trait NativeSource {
    /// Allocate a stream that will deliver batches into `sink`
    fn create_stream(
        &self,
        request: &StreamRequest<'_>,
        sink: BatchSink,
    ) -> Result<Box<dyn NativeStream>, CreationFailure>;

    /// Whether this platform defines the item-cloned flag
    fn item_cloned_supported(&self) -> bool {
        true
    }
}

/// One native watch handle
///
/// The lifecycle guarantees call order: `schedule` at most once and before
/// the first `start`; `start`/`stop` alternate; `invalidate` at most once and
/// only after `schedule`; drop last.
pub trait NativeStream: Send {
    /// Attach the stream to its delivery context
    fn schedule(&mut self);

    /// Activate delivery. Returns false if the native source refused.
    fn start(&mut self) -> bool;

    /// Deactivate delivery; the handle stays valid
    fn stop(&mut self);

    /// Detach from the delivery context before release
    fn invalidate(&mut self);
}
