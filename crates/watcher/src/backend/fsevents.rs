//! FSEvents source for macOS
//!
//! Each stream is scheduled on its own serial dispatch queue. The callback
//! context is an `Arc<BatchSink>` whose lifetime FSEvents manages through the
//! retain/release callbacks, so a late callback never sees freed memory.

use crate::dispatch::BatchSink;
use crate::error::CreationFailure;
use crate::native::{NativeSource, NativeStream, StreamRequest};
use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::TCFType;
use core_foundation::string::CFString;
use fsevent_sys as fs;
use fsstream_core::{EventFlags, EventId, RawBatch, RawEvent};
use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

const QUEUE_LABEL: &str = "fsstream.fsevents";

type DispatchQueue = *mut c_void;

#[link(name = "CoreServices", kind = "framework")]
extern "C" {
    fn FSEventStreamSetDispatchQueue(stream: fs::FSEventStreamRef, queue: DispatchQueue);
}

extern "C" {
    fn dispatch_queue_create(label: *const c_char, attr: *const c_void) -> DispatchQueue;
    fn dispatch_release(object: *mut c_void);
}

/// Id of the most recent event the system has recorded
pub fn current_event_id() -> EventId {
    EventId(unsafe { fs::FSEventsGetCurrentEventId() })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsEventsSource;

impl NativeSource for FsEventsSource {
    fn create_stream(
        &self,
        request: &StreamRequest<'_>,
        sink: BatchSink,
    ) -> Result<Box<dyn NativeStream>, CreationFailure> {
        let paths: Vec<CFString> = request.paths.iter().map(|p| CFString::new(p)).collect();
        let paths = CFArray::from_CFTypes(&paths);

        let info = Arc::into_raw(Arc::new(sink)) as *mut c_void;
        let context = fs::FSEventStreamContext {
            version: 0,
            info,
            retain: Some(retain_sink),
            release: Some(release_sink),
            copy_description: None,
        };

        let stream = unsafe {
            fs::FSEventStreamCreate(
                ptr::null_mut::<c_void>() as _,
                callback,
                &context,
                paths.as_concrete_TypeRef() as _,
                request.since.get(),
                request.latency.as_secs_f64(),
                request.flags.bits(),
            )
        };

        // FSEvents retained its own reference if creation succeeded
        release_sink(info);

        if stream.is_null() {
            return Err(CreationFailure::Rejected(
                "FSEventStreamCreate returned null".to_string(),
            ));
        }

        Ok(Box::new(FsEventsStream {
            stream,
            queue: ptr::null_mut(),
        }))
    }
}

pub struct FsEventsStream {
    stream: fs::FSEventStreamRef,
    queue: DispatchQueue,
}

// The stream ref is only touched through the owning lifecycle, which
// serializes all calls.
unsafe impl Send for FsEventsStream {}

impl NativeStream for FsEventsStream {
    fn schedule(&mut self) {
        let label = CString::new(QUEUE_LABEL).unwrap_or_default();
        unsafe {
            self.queue = dispatch_queue_create(label.as_ptr(), ptr::null());
            FSEventStreamSetDispatchQueue(self.stream, self.queue);
        }
    }

    fn start(&mut self) -> bool {
        unsafe { fs::FSEventStreamStart(self.stream) != 0 }
    }

    fn stop(&mut self) {
        unsafe { fs::FSEventStreamStop(self.stream) };
    }

    fn invalidate(&mut self) {
        unsafe {
            fs::FSEventStreamInvalidate(self.stream);
            if !self.queue.is_null() {
                dispatch_release(self.queue);
                self.queue = ptr::null_mut();
            }
        }
    }
}

impl Drop for FsEventsStream {
    fn drop(&mut self) {
        debug!("Releasing FSEvents stream");
        unsafe { fs::FSEventStreamRelease(self.stream) };
    }
}

extern "C" fn retain_sink(info: *const c_void) -> *const c_void {
    unsafe { Arc::increment_strong_count(info as *const BatchSink) };
    info
}

extern "C" fn release_sink(info: *const c_void) {
    unsafe { Arc::decrement_strong_count(info as *const BatchSink) };
}

extern "C" fn callback(
    _stream: fs::FSEventStreamRef,
    info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const fs::FSEventStreamEventFlags,
    event_ids: *const fs::FSEventStreamEventId,
) {
    if info.is_null() || num_events == 0 {
        return;
    }

    // Own a reference for the whole callback; an inline handler tearing the
    // subscription down releases the stream, and with it the context's.
    let sink = unsafe {
        Arc::increment_strong_count(info as *const BatchSink);
        Arc::from_raw(info as *const BatchSink)
    };
    if sink.is_closed() {
        return;
    }

    // use-cf-types is always requested, so paths arrive as a CFArray of CFString
    let paths: CFArray<CFString> =
        unsafe { CFArray::wrap_under_get_rule(event_paths as CFArrayRef) };
    let flags = unsafe { std::slice::from_raw_parts(event_flags, num_events) };
    let ids = unsafe { std::slice::from_raw_parts(event_ids, num_events) };

    let mut batch = RawBatch::with_capacity(num_events);
    for i in 0..num_events {
        let Some(path) = paths.get(i as _) else {
            warn!("FSEvents callback missing path {} of {}", i, num_events);
            continue;
        };
        batch.push(RawEvent::new(
            path.to_string(),
            EventId(ids[i]),
            EventFlags::from_raw(flags[i]),
        ));
    }

    sink.deliver(batch);
}
