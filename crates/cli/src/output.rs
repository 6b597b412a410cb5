//! Rendering deliveries for the terminal

use chrono::{DateTime, Local};
use fsstream_core::FsEvent;
use fsstream_watcher::{Delivery, SubscriptionId};
use owo_colors::OwoColorize;
use serde::Serialize;

/// Colored one-line description of an event
pub fn paint(event: &FsEvent) -> String {
    let text = event.to_string();
    match event {
        FsEvent::ItemCreated(_) | FsEvent::ItemCloned(_) => text.green().to_string(),
        FsEvent::ItemRemoved(_) => text.red().to_string(),
        FsEvent::ItemRenamed(_) => text.yellow().to_string(),
        FsEvent::ItemDataModified(_)
        | FsEvent::ItemInodeMetadataModified(_)
        | FsEvent::ItemMetadataTagModified(_)
        | FsEvent::ItemOwnershipModified(_)
        | FsEvent::ItemExtendedAttributeModified(_) => text.cyan().to_string(),
        FsEvent::MustScanSubdirs { .. } | FsEvent::SequenceIdsWrapped => {
            text.red().bold().to_string()
        }
        FsEvent::RootChanged { .. }
        | FsEvent::VolumeMounted { .. }
        | FsEvent::VolumeUnmounted { .. } => text.magenta().to_string(),
        FsEvent::HistoryReplayDone => text.dimmed().to_string(),
        FsEvent::Generic { .. } => text,
    }
}

/// Text line: local time, subscription, event
pub fn render_line(delivery: &Delivery, at: DateTime<Local>) -> String {
    format!(
        "{} {} {}",
        at.format("%H:%M:%S%.3f").to_string().dimmed(),
        delivery.subscription.to_string().dimmed(),
        paint(&delivery.event)
    )
}

#[derive(Serialize)]
struct JsonLine<'a> {
    time: String,
    subscription: SubscriptionId,
    event: &'a FsEvent,
}

/// JSON line with an RFC 3339 timestamp
pub fn render_json(delivery: &Delivery, at: DateTime<Local>) -> serde_json::Result<String> {
    serde_json::to_string(&JsonLine {
        time: at.to_rfc3339(),
        subscription: delivery.subscription,
        event: &delivery.event,
    })
}
