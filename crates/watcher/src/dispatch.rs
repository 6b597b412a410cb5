//! Bridge from native callbacks back to a subscription
//!
//! The native side only ever holds a `BatchSink`, a weak reference to the
//! subscription. A callback that fires after the owner is gone upgrades to
//! nothing and returns without touching freed state.

use crate::subscription::Shared;
use crossbeam_channel::{Receiver, Sender};
use fsstream_core::RawBatch;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Weak;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace};

/// Where native callbacks hand their raw batches
#[derive(Clone)]
pub struct BatchSink {
    shared: Weak<Shared>,
}

impl BatchSink {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Hand one native batch to the subscription
    ///
    /// Entries are processed in the order given. No-op once the owning
    /// subscription has been dropped.
    pub fn deliver(&self, batch: RawBatch) {
        if batch.is_empty() {
            return;
        }
        match self.shared.upgrade() {
            Some(shared) => shared.route(batch),
            None => trace!("Subscription gone, dropping {} raw events", batch.len()),
        }
    }

    /// True once the owning subscription no longer exists
    pub fn is_closed(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl fmt::Debug for BatchSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Background thread running the handler for one subscription
pub(crate) struct Dispatcher {
    thread: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the thread; batches sent on the returned sender are dispatched
    /// in order until every sender is dropped.
    pub(crate) fn spawn(name: &str, shared: Weak<Shared>) -> std::io::Result<(Self, Sender<RawBatch>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(rx, shared))?;
        Ok((Self { thread }, tx))
    }

    /// Wait for the thread to drain and exit
    ///
    /// Called from the dispatcher thread itself (a handler tearing down its
    /// own subscription) the thread is detached instead.
    pub(crate) fn join(self) {
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            debug!("Dispatcher thread panicked");
        }
    }
}

fn run(rx: Receiver<RawBatch>, shared: Weak<Shared>) {
    for batch in rx.iter() {
        match shared.upgrade() {
            Some(shared) => shared.dispatch(batch),
            None => break,
        }
    }
    trace!("Dispatcher thread exiting");
}

/// Tracks threads currently running the handler
///
/// Teardown waits here so the native handle is never released under a
/// running callback, except on the callback's own thread.
#[derive(Default)]
pub(crate) struct InFlight {
    threads: Mutex<SmallVec<[ThreadId; 2]>>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn enter(&self) -> InFlightGuard<'_> {
        let thread = thread::current().id();
        self.threads.lock().push(thread);
        InFlightGuard { gate: self, thread }
    }

    /// Block until no other thread is running the handler
    pub(crate) fn wait_idle(&self) {
        let me = thread::current().id();
        let mut threads = self.threads.lock();
        while threads.iter().any(|thread| *thread != me) {
            self.idle.wait(&mut threads);
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> usize {
        self.threads.lock().len()
    }
}

pub(crate) struct InFlightGuard<'a> {
    gate: &'a InFlight,
    thread: ThreadId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self.gate.threads.lock();
        if let Some(pos) = threads.iter().position(|thread| *thread == self.thread) {
            threads.swap_remove(pos);
        }
        self.gate.idle.notify_all();
    }
}
