//! Native notification sources
//!
//! On macOS subscriptions talk to FSEvents directly. Elsewhere the portable
//! source emulates FSEvents semantics on top of `notify`.

#[cfg(target_os = "macos")]
pub mod fsevents;
pub mod portable;

#[cfg(target_os = "macos")]
pub type DefaultSource = fsevents::FsEventsSource;

#[cfg(not(target_os = "macos"))]
pub type DefaultSource = portable::PortableSource;

/// The source `Subscription::create` uses on this platform
pub fn default_source() -> DefaultSource {
    DefaultSource::default()
}
