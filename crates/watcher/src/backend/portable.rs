//! FSEvents emulation over `notify`
//!
//! A pump thread turns notify's per-path events into raw flag batches the
//! decoder understands, honoring the latency and no-defer create options.
//! Without file-events the emulation reports the containing directory with no
//! flags, the way FSEvents does at directory granularity.

use crate::dispatch::BatchSink;
use crate::error::CreationFailure;
use crate::native::{NativeSource, NativeStream, StreamRequest};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use fsstream_core::{CreateFlags, EventFlags, EventId, RawBatch, RawEvent};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const PUMP_THREAD: &str = "fsstream-notify";

/// Portable native source backed by the platform's recommended watcher
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableSource;

impl NativeSource for PortableSource {
    fn create_stream(
        &self,
        request: &StreamRequest<'_>,
        sink: BatchSink,
    ) -> Result<Box<dyn NativeStream>, CreationFailure> {
        let roots = request
            .paths
            .iter()
            .map(|path| {
                let root = PathBuf::from(path);
                if root.exists() {
                    Ok(root)
                } else {
                    Err(CreationFailure::InvalidPath { path: path.clone() })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let notify_tx = tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = notify_tx.send(PumpMsg::Notify(res));
            },
            notify::Config::default(),
        )
        .map_err(|e| CreationFailure::Rejected(e.to_string()))?;

        if request
            .flags
            .intersects(CreateFlags::MARK_SELF | CreateFlags::IGNORE_SELF)
        {
            debug!("Own-event marking is not available on this platform");
        }

        let replay = !request.since.is_since_now();
        let pump = Pump {
            rx,
            sink,
            translator: Translator::new(roots.clone(), request.flags, request.since),
            latency: request.latency,
            no_defer: request.flags.contains(CreateFlags::NO_DEFER),
        };

        Ok(Box::new(PortableStream {
            watcher,
            roots,
            watching: Vec::new(),
            tx,
            pump: Some(pump),
            pump_thread: None,
            history_pending: replay,
        }))
    }

    /// Item-cloned is an APFS notion with no portable equivalent
    fn item_cloned_supported(&self) -> bool {
        false
    }
}

enum PumpMsg {
    Notify(notify::Result<Event>),
    HistoryDone,
    Shutdown,
}

pub struct PortableStream {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
    watching: Vec<PathBuf>,
    tx: Sender<PumpMsg>,
    /// Held until scheduled
    pump: Option<Pump>,
    pump_thread: Option<JoinHandle<()>>,
    history_pending: bool,
}

impl PortableStream {
    fn shutdown_pump(&mut self) {
        let Some(handle) = self.pump_thread.take() else {
            return;
        };
        let _ = self.tx.send(PumpMsg::Shutdown);
        if handle.thread().id() == thread::current().id() {
            // Torn down from inside the handler; the loop exits on its own
            return;
        }
        if handle.join().is_err() {
            warn!("Notify pump thread panicked");
        }
    }
}

impl NativeStream for PortableStream {
    fn schedule(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        match thread::Builder::new()
            .name(PUMP_THREAD.to_string())
            .spawn(move || pump.run())
        {
            Ok(handle) => self.pump_thread = Some(handle),
            Err(e) => warn!("Failed to spawn notify pump thread: {}", e),
        }
    }

    fn start(&mut self) -> bool {
        if self.pump_thread.is_none() {
            return false;
        }

        for root in &self.roots {
            if self.watching.contains(root) {
                continue;
            }
            match self.watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => self.watching.push(root.clone()),
                Err(e) => warn!("Failed to watch {}: {}", root.display(), e),
            }
        }
        if self.watching.is_empty() {
            return false;
        }

        if std::mem::take(&mut self.history_pending) {
            let _ = self.tx.send(PumpMsg::HistoryDone);
        }
        true
    }

    fn stop(&mut self) {
        for root in self.watching.drain(..) {
            if let Err(e) = self.watcher.unwatch(&root) {
                debug!("Failed to unwatch {}: {}", root.display(), e);
            }
        }
    }

    fn invalidate(&mut self) {
        self.stop();
        self.shutdown_pump();
    }
}

impl Drop for PortableStream {
    fn drop(&mut self) {
        self.shutdown_pump();
    }
}

struct Pump {
    rx: Receiver<PumpMsg>,
    sink: BatchSink,
    translator: Translator,
    latency: Duration,
    no_defer: bool,
}

impl Pump {
    fn run(mut self) {
        let mut pending = RawBatch::new();
        let mut deadline: Option<Instant> = None;
        let mut last_flush: Option<Instant> = None;

        loop {
            let msg = match deadline {
                Some(at) => match self.rx.recv_deadline(at) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => break,
                },
            };

            match msg {
                None => {
                    self.flush(&mut pending);
                    last_flush = Some(Instant::now());
                    deadline = None;
                    continue;
                }
                Some(PumpMsg::Shutdown) => break,
                Some(PumpMsg::HistoryDone) => pending.push(self.translator.history_done()),
                Some(PumpMsg::Notify(Ok(event))) => self.translator.translate(event, &mut pending),
                Some(PumpMsg::Notify(Err(e))) => warn!("Watch error: {}", e),
            }

            if pending.is_empty() || deadline.is_some() {
                continue;
            }

            let now = Instant::now();
            let quiet = last_flush.map_or(true, |at| now.duration_since(at) >= self.latency);
            if self.latency.is_zero() || (self.no_defer && quiet) {
                self.flush(&mut pending);
                last_flush = Some(now);
            } else {
                deadline = Some(now + self.latency);
            }
        }

        trace!("Notify pump exiting with {} undelivered events", pending.len());
    }

    fn flush(&self, pending: &mut RawBatch) {
        if pending.is_empty() {
            return;
        }
        self.sink.deliver(std::mem::take(pending));
    }
}

/// Maps notify events onto FSEvents-style raw events
pub(crate) struct Translator {
    roots: Vec<PathBuf>,
    file_events: bool,
    watch_root: bool,
    next_id: u64,
}

impl Translator {
    pub(crate) fn new(roots: Vec<PathBuf>, flags: CreateFlags, since: EventId) -> Self {
        let next_id = if since.is_since_now() {
            1
        } else {
            since.get().saturating_add(1)
        };
        Self {
            roots,
            file_events: flags.contains(CreateFlags::FILE_EVENTS),
            watch_root: flags.contains(CreateFlags::WATCH_ROOT),
            next_id,
        }
    }

    fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// No history is kept, so replay ends immediately
    pub(crate) fn history_done(&mut self) -> RawEvent {
        let id = self.next_id();
        RawEvent::new("", id, EventFlags::HISTORY_DONE)
    }

    pub(crate) fn translate(&mut self, event: Event, out: &mut RawBatch) {
        if event.need_rescan() {
            let paths = if event.paths.is_empty() {
                self.roots.clone()
            } else {
                event.paths
            };
            for path in paths {
                let id = self.next_id();
                out.push(RawEvent::new(
                    display(&path),
                    id,
                    EventFlags::MUST_SCAN_SUB_DIRS | EventFlags::KERNEL_DROPPED,
                ));
            }
            return;
        }

        let Some(flags) = kind_flags(&event.kind) else {
            return;
        };

        for path in &event.paths {
            if self.watch_root && self.is_root(path) && moves_away(&event.kind) {
                out.push(RawEvent::new(display(path), EventId(0), EventFlags::ROOT_CHANGED));
                continue;
            }

            if self.file_events {
                let id = self.next_id();
                // Unclassified changes carry no flags so they decode as generic
                let flags = if flags.is_empty() {
                    flags
                } else {
                    flags | item_kind(&event.kind, path)
                };
                out.push(RawEvent::new(display(path), id, flags));
                continue;
            }

            let dir = self.containing_dir(path);
            let dir = display(&dir);
            if out.iter().any(|raw| raw.flags.is_empty() && raw.path == dir) {
                continue;
            }
            let id = self.next_id();
            out.push(RawEvent::new(dir, id, EventFlags::empty()));
        }
    }

    fn is_root(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| root == path)
    }

    fn containing_dir(&self, path: &Path) -> PathBuf {
        if self.is_root(path) {
            return path.to_path_buf();
        }
        match path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => path.to_path_buf(),
        }
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn kind_flags(kind: &EventKind) -> Option<EventFlags> {
    let flags = match kind {
        EventKind::Access(_) => return None,
        EventKind::Create(_) => EventFlags::ITEM_CREATED,
        EventKind::Remove(_) => EventFlags::ITEM_REMOVED,
        EventKind::Modify(ModifyKind::Name(_)) => EventFlags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => {
            EventFlags::ITEM_CHANGE_OWNER
        }
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => {
            EventFlags::ITEM_XATTR_MOD
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => EventFlags::ITEM_INODE_META_MOD,
        EventKind::Modify(_) => EventFlags::ITEM_MODIFIED,
        EventKind::Any | EventKind::Other => EventFlags::empty(),
    };
    Some(flags)
}

fn item_kind(kind: &EventKind, path: &Path) -> EventFlags {
    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
            EventFlags::ITEM_IS_FILE
        }
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            EventFlags::ITEM_IS_DIR
        }
        _ => match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => EventFlags::ITEM_IS_SYMLINK,
            Ok(meta) if meta.is_dir() => EventFlags::ITEM_IS_DIR,
            Ok(_) => EventFlags::ITEM_IS_FILE,
            Err(_) => EventFlags::empty(),
        },
    }
}

fn moves_away(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchTarget, SubscriptionConfig};
    use crate::subscription::Subscription;
    use fsstream_core::{decode, FsEvent};
    use notify::event::{DataChange, Flag, RenameMode};
    use parking_lot::Mutex;

    fn translator(flags: CreateFlags) -> Translator {
        Translator::new(vec![PathBuf::from("/w")], flags, EventId::SINCE_NOW)
    }

    fn translate(t: &mut Translator, event: Event) -> RawBatch {
        let mut out = RawBatch::new();
        t.translate(event, &mut out);
        out
    }

    #[test]
    fn test_file_events_carry_flags_and_kind() {
        let mut t = translator(CreateFlags::FILE_EVENTS);
        let out = translate(
            &mut t,
            Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a.txt".into()),
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "/w/a.txt");
        assert_eq!(out[0].id, EventId(1));
        assert_eq!(
            out[0].flags,
            EventFlags::ITEM_CREATED | EventFlags::ITEM_IS_FILE
        );
    }

    #[test]
    fn test_modify_kinds() {
        let cases = [
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                EventFlags::ITEM_MODIFIED,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)),
                EventFlags::ITEM_CHANGE_OWNER,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)),
                EventFlags::ITEM_XATTR_MOD,
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                EventFlags::ITEM_INODE_META_MOD,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                EventFlags::ITEM_RENAMED,
            ),
            (EventKind::Remove(RemoveKind::Folder), EventFlags::ITEM_REMOVED),
        ];

        for (kind, expected) in cases {
            let label = format!("{:?}", kind);
            let mut t = translator(CreateFlags::FILE_EVENTS);
            let out = translate(&mut t, Event::new(kind).add_path("/w/missing/x".into()));
            assert_eq!(out.len(), 1, "{}", label);
            assert!(out[0].flags.contains(expected), "{}", label);
        }
    }

    #[test]
    fn test_access_is_ignored() {
        let mut t = translator(CreateFlags::FILE_EVENTS);
        let out = translate(
            &mut t,
            Event::new(EventKind::Access(notify::event::AccessKind::Any))
                .add_path("/w/a".into()),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_directory_granularity_coalesces() {
        let mut t = translator(CreateFlags::empty());
        let mut out = RawBatch::new();
        t.translate(
            Event::new(EventKind::Create(CreateKind::File)).add_path("/w/sub/a".into()),
            &mut out,
        );
        t.translate(
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/w/sub/b".into()),
            &mut out,
        );
        t.translate(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/c".into()),
            &mut out,
        );

        let paths: Vec<_> = out.iter().map(|raw| raw.path.as_str()).collect();
        assert_eq!(paths, ["/w/sub", "/w"]);
        assert!(out.iter().all(|raw| raw.flags.is_empty()));
    }

    #[test]
    fn test_root_changed_under_watch_root() {
        let mut t = translator(CreateFlags::WATCH_ROOT | CreateFlags::FILE_EVENTS);
        let out = translate(
            &mut t,
            Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/w".into()),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].flags, EventFlags::ROOT_CHANGED);
        assert_eq!(out[0].id, EventId(0));

        // Without watch-root the root is reported like any other item
        let mut t = translator(CreateFlags::FILE_EVENTS);
        let out = translate(
            &mut t,
            Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/w".into()),
        );
        assert!(out[0].flags.contains(EventFlags::ITEM_REMOVED));
    }

    #[test]
    fn test_rescan_maps_to_kernel_dropped() {
        let mut t = translator(CreateFlags::FILE_EVENTS);
        let out = translate(&mut t, Event::new(EventKind::Other).set_flag(Flag::Rescan));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "/w");
        assert_eq!(
            out[0].flags,
            EventFlags::MUST_SCAN_SUB_DIRS | EventFlags::KERNEL_DROPPED
        );
    }

    #[test]
    fn test_ids_continue_after_since() {
        let mut t = Translator::new(
            vec![PathBuf::from("/w")],
            CreateFlags::FILE_EVENTS,
            EventId(41),
        );
        let done = t.history_done();
        assert_eq!(done.id, EventId(42));
        assert_eq!(done.flags, EventFlags::HISTORY_DONE);

        let out = translate(
            &mut t,
            Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a".into()),
        );
        assert_eq!(out[0].id, EventId(43));
    }

    #[test]
    fn test_missing_path_is_invalid() {
        let sink = BatchSink::new(std::sync::Weak::new());
        let paths = vec!["/definitely/not/here/fsstream".to_string()];
        let request = StreamRequest {
            paths: &paths,
            since: EventId::SINCE_NOW,
            latency: Duration::ZERO,
            flags: CreateFlags::USE_CF_TYPES,
        };

        let err = PortableSource.create_stream(&request, sink).err().unwrap();
        assert_eq!(
            err,
            CreationFailure::InvalidPath {
                path: "/definitely/not/here/fsstream".to_string()
            }
        );
    }

    #[test]
    fn test_unclassified_events_decode_as_generic() {
        let mut t = translator(CreateFlags::FILE_EVENTS);
        let out = translate(&mut t, Event::new(EventKind::Any).add_path("/w/a.txt".into()));

        assert_eq!(out.len(), 1);
        assert!(out[0].flags.is_empty());
        let events = decode(&out[0], CreateFlags::USE_CF_TYPES | CreateFlags::FILE_EVENTS);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FsEvent::Generic { .. }));
    }

    /// Captures the sink and leaves the pump to the test
    #[derive(Default)]
    struct CapturingSource {
        sink: Mutex<Option<BatchSink>>,
    }

    struct IdleStream;

    impl NativeSource for CapturingSource {
        fn create_stream(
            &self,
            _request: &StreamRequest<'_>,
            sink: BatchSink,
        ) -> Result<Box<dyn NativeStream>, CreationFailure> {
            *self.sink.lock() = Some(sink);
            Ok(Box::new(IdleStream))
        }
    }

    impl NativeStream for IdleStream {
        fn schedule(&mut self) {}

        fn start(&mut self) -> bool {
            true
        }

        fn stop(&mut self) {}

        fn invalidate(&mut self) {}
    }

    struct PumpHarness {
        tx: Sender<PumpMsg>,
        arrivals: Receiver<Instant>,
        thread: JoinHandle<()>,
        _subscription: Subscription,
    }

    impl PumpHarness {
        fn spawn(latency: Duration, no_defer: bool) -> Self {
            let source = CapturingSource::default();
            let (arrived_tx, arrivals) = crossbeam_channel::unbounded();
            let config = SubscriptionConfig::new(["/w"])
                .flags(CreateFlags::FILE_EVENTS)
                .dispatch(DispatchTarget::Inline);
            let subscription = Subscription::create_with(&source, config, move |_, _| {
                let _ = arrived_tx.send(Instant::now());
            })
            .unwrap();
            subscription.start();

            let (tx, rx) = crossbeam_channel::unbounded();
            let pump = Pump {
                rx,
                sink: source.sink.lock().clone().unwrap(),
                translator: translator(CreateFlags::FILE_EVENTS),
                latency,
                no_defer,
            };
            let thread = thread::spawn(move || pump.run());

            Self {
                tx,
                arrivals,
                thread,
                _subscription: subscription,
            }
        }

        fn send_change(&self, name: &str) -> Instant {
            let sent = Instant::now();
            let event = Event::new(EventKind::Create(CreateKind::File))
                .add_path(PathBuf::from("/w").join(name));
            self.tx.send(PumpMsg::Notify(Ok(event))).unwrap();
            sent
        }

        fn next_arrival(&self) -> Instant {
            self.arrivals.recv_timeout(Duration::from_secs(10)).unwrap()
        }

        fn shutdown(self) {
            self.tx.send(PumpMsg::Shutdown).unwrap();
            self.thread.join().unwrap();
        }
    }

    #[test]
    fn test_latency_defers_first_flush() {
        let latency = Duration::from_millis(200);
        let pump = PumpHarness::spawn(latency, false);

        let sent = pump.send_change("a.txt");
        let arrived = pump.next_arrival();
        assert!(arrived.duration_since(sent) >= latency);

        pump.shutdown();
    }

    #[test]
    fn test_no_defer_flushes_first_then_waits() {
        let latency = Duration::from_millis(500);
        let pump = PumpHarness::spawn(latency, true);

        let first_sent = pump.send_change("a.txt");
        let first = pump.next_arrival();
        assert!(first.duration_since(first_sent) < latency);

        // Still inside the quiet window of the first flush
        let second_sent = pump.send_change("b.txt");
        let second = pump.next_arrival();
        assert!(second.duration_since(second_sent) >= latency);
        assert!(second.duration_since(first) >= latency);

        pump.shutdown();
    }

    #[test]
    fn test_shutdown_exits_pump() {
        let pump = PumpHarness::spawn(Duration::from_secs(30), false);
        pump.send_change("a.txt");

        let arrivals = pump.arrivals.clone();
        pump.shutdown();
        assert!(arrivals.try_recv().is_err());
    }
}
