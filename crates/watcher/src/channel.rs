//! Async adapter: subscriptions as a tokio channel

use crate::backend;
use crate::config::SubscriptionConfig;
use crate::error::Result;
use crate::native::NativeSource;
use crate::subscription::{Subscription, SubscriptionId};
use fsstream_core::FsEvent;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// One event together with the subscription that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub event: FsEvent,
}

/// Create and start a subscription on the default source
///
/// Events arrive on the returned receiver. The subscription keeps running
/// until it is dropped; dropping only the receiver silently discards events.
pub fn subscribe(
    config: SubscriptionConfig,
) -> Result<(Subscription, mpsc::UnboundedReceiver<Delivery>)> {
    subscribe_with(&backend::default_source(), config)
}

pub fn subscribe_with<S>(
    source: &S,
    config: SubscriptionConfig,
) -> Result<(Subscription, mpsc::UnboundedReceiver<Delivery>)>
where
    S: NativeSource + ?Sized,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = Subscription::create_with(source, config, move |stream, event| {
        let delivery = Delivery {
            subscription: stream.id(),
            event,
        };
        if tx.send(delivery).is_err() {
            trace!("Receiver for {} dropped", stream.id());
        }
    })?;
    subscription.start();
    Ok((subscription, rx))
}
