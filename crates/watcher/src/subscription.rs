//! Subscription lifecycle
//!
//! ```text
//! Created --start--> Scheduled --> Started <--stop/start--> Stopped
//!    \                                 \                       /
//!     +-------------- teardown ---------+---> Invalidated <---+
//! ```
//!
//! Scheduling happens lazily on the first `start`. Every transition is
//! idempotent and never fails; the only fallible step is creation.

use crate::backend;
use crate::config::{DispatchTarget, SubscriptionConfig};
use crate::dispatch::{BatchSink, Dispatcher, InFlight};
use crate::error::Result;
use crate::native::{NativeSource, NativeStream, StreamRequest};
use crossbeam_channel::Sender;
use fsstream_core::{Decoder, FsEvent, RawBatch};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    Scheduled,
    Started,
    Stopped,
    Invalidated,
}

type Handler = dyn Fn(&SubscriptionRef<'_>, FsEvent) + Send + Sync;

struct Lifecycle {
    state: State,
    native: Option<Box<dyn NativeStream>>,
    dispatcher: Option<Dispatcher>,
}

pub(crate) struct Shared {
    id: SubscriptionId,
    config: SubscriptionConfig,
    decoder: Decoder,
    handler: Box<Handler>,
    lifecycle: Mutex<Lifecycle>,
    /// Checked before every handler call; cleared by stop and teardown
    delivering: AtomicBool,
    router: Mutex<Option<Sender<RawBatch>>>,
    in_flight: InFlight,
    weak_self: Weak<Shared>,
}

impl Shared {
    fn state(&self) -> State {
        self.lifecycle.lock().state
    }

    fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            State::Started | State::Invalidated => return,
            State::Created => self.schedule(&mut lifecycle),
            State::Scheduled | State::Stopped => {}
        }

        let Some(native) = lifecycle.native.as_mut() else {
            return;
        };

        // Open the gate first so the earliest batch is not lost
        self.delivering.store(true, Ordering::Release);
        if native.start() {
            lifecycle.state = State::Started;
            debug!("Started subscription {}", self.id);
        } else {
            self.delivering.store(false, Ordering::Release);
            warn!("Native source refused to start subscription {}", self.id);
        }
    }

    fn schedule(&self, lifecycle: &mut Lifecycle) {
        if let DispatchTarget::Background { thread_name } = &self.config.dispatch {
            match Dispatcher::spawn(thread_name, self.weak_self.clone()) {
                Ok((dispatcher, tx)) => {
                    *self.router.lock() = Some(tx);
                    lifecycle.dispatcher = Some(dispatcher);
                }
                Err(e) => warn!(
                    "Failed to spawn dispatcher thread {}, delivering inline: {}",
                    thread_name, e
                ),
            }
        }

        if let Some(native) = lifecycle.native.as_mut() {
            native.schedule();
        }
        lifecycle.state = State::Scheduled;
        trace!("Scheduled subscription {}", self.id);
    }

    fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != State::Started {
            return;
        }

        self.delivering.store(false, Ordering::Release);
        if let Some(native) = lifecycle.native.as_mut() {
            native.stop();
        }
        lifecycle.state = State::Stopped;
        debug!("Stopped subscription {}", self.id);
    }

    fn teardown(&self) {
        let (previous, native, dispatcher) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == State::Invalidated {
                return;
            }
            let previous = lifecycle.state;
            lifecycle.state = State::Invalidated;
            self.delivering.store(false, Ordering::Release);
            (previous, lifecycle.native.take(), lifecycle.dispatcher.take())
        };

        // The lock is released here: a handler still running on another
        // thread may call stop/start and will observe Invalidated.
        let Some(mut native) = native else {
            return;
        };
        if previous == State::Started {
            native.stop();
        }
        if previous != State::Created {
            native.invalidate();
        }

        *self.router.lock() = None;
        if let Some(dispatcher) = dispatcher {
            dispatcher.join();
        }
        self.in_flight.wait_idle();

        drop(native);
        debug!("Released subscription {}", self.id);
    }

    /// Entry point for native batches
    pub(crate) fn route(&self, batch: RawBatch) {
        if !self.delivering.load(Ordering::Acquire) {
            trace!("Subscription {} not delivering, dropping batch", self.id);
            return;
        }

        let router = self.router.lock().clone();
        match router {
            Some(tx) => {
                if tx.send(batch).is_err() {
                    trace!("Dispatcher for {} already gone", self.id);
                }
            }
            None => self.dispatch(batch),
        }
    }

    /// Decode a batch and run the handler for every resulting event
    pub(crate) fn dispatch(&self, batch: RawBatch) {
        let _in_flight = self.in_flight.enter();
        let stream = SubscriptionRef { shared: self };

        for raw in &batch {
            for event in self.decoder.decode(raw) {
                if !self.delivering.load(Ordering::Acquire) {
                    trace!("Subscription {} stopped mid-batch", self.id);
                    return;
                }
                (self.handler)(&stream, event);
            }
        }
    }
}

/// A live watch over one or more paths
///
/// Dropping the subscription tears it down.
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// Create a subscription on the platform's default source
    pub fn create<F>(config: SubscriptionConfig, handler: F) -> Result<Self>
    where
        F: Fn(&SubscriptionRef<'_>, FsEvent) + Send + Sync + 'static,
    {
        Self::create_with(&backend::default_source(), config, handler)
    }

    /// Create a subscription on an explicit native source
    pub fn create_with<S, F>(source: &S, config: SubscriptionConfig, handler: F) -> Result<Self>
    where
        S: NativeSource + ?Sized,
        F: Fn(&SubscriptionRef<'_>, FsEvent) + Send + Sync + 'static,
    {
        config.validate()?;

        let decoder = Decoder::new(config.effective_flags())
            .with_item_cloned(source.item_cloned_supported());
        let id = SubscriptionId::next();

        let shared = Arc::new_cyclic(|weak_self| Shared {
            id,
            config,
            decoder,
            handler: Box::new(handler),
            lifecycle: Mutex::new(Lifecycle {
                state: State::Created,
                native: None,
                dispatcher: None,
            }),
            delivering: AtomicBool::new(false),
            router: Mutex::new(None),
            in_flight: InFlight::default(),
            weak_self: weak_self.clone(),
        });

        let request = StreamRequest::from_config(&shared.config);
        let sink = BatchSink::new(Arc::downgrade(&shared));
        let native = source.create_stream(&request, sink).map_err(|e| {
            debug!("Creating subscription {} failed: {}", id, e);
            e
        })?;
        shared.lifecycle.lock().native = Some(native);

        debug!(
            "Created subscription {} for {} path(s)",
            id,
            shared.config.paths.len()
        );
        Ok(Self { shared })
    }

    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    /// Schedule on first use, then activate delivery
    pub fn start(&self) {
        self.shared.start();
    }

    /// Suspend delivery; no handler call begins after this returns
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stop, invalidate and release the native stream
    ///
    /// Blocks until handlers running on other threads have returned.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("paths", &self.shared.config.paths)
            .finish()
    }
}

/// View of the subscription handed to the handler
#[derive(Clone, Copy)]
pub struct SubscriptionRef<'a> {
    shared: &'a Shared,
}

impl SubscriptionRef<'_> {
    pub fn id(&self) -> SubscriptionId {
        self.shared.id
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.shared.config
    }

    pub fn start(&self) {
        self.shared.start();
    }

    /// Stops delivery; remaining events of the current batch are dropped
    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl fmt::Debug for SubscriptionRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRef")
            .field("id", &self.shared.id)
            .finish()
    }
}
