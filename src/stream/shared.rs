//! State of a stream that is touched from outside its phase work items.
//!
//! Filter handlers, timers and transport callbacks may run on any thread
//! while a phase is executing, so everything here is atomic or behind a
//! short-lived lock that is never held across a filter callback.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::TerminateReason;
use crate::filter::types::ReceiverFilterPhase;
use crate::stream::downstream::DownstreamStream;
use crate::stream::message::{HeaderMap, IoBuffer, Message, RequestInfo, STATUS_HEADER};
use crate::stream::phase::{Phase, StreamId};
use crate::upstream::Route;

/// Read-only context handed to every filter callback.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub stream_id: StreamId,
    pub request_id: Uuid,
    /// Name of the proxy (listener) the stream belongs to.
    pub proxy_name: Arc<str>,
}

/// Externally observable progress of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// A phase is executing or the stream waits on a collaborator.
    Running,
    /// A filter returned `Stop` at the given phase; waiting for resumption.
    Paused(Phase),
    /// Cleanup ran.
    Finished(TerminateReason),
}

/// Pending hijack reply. Closed once the stream reaches its sender filters.
#[derive(Debug, Default)]
struct HijackSlot {
    reply: Option<Message>,
    closed: bool,
}

/// Response parts replaced by sender filters through their handler.
#[derive(Debug, Default)]
struct ResponseOverride {
    headers: Option<HeaderMap>,
    data: Option<IoBuffer>,
    trailers: Option<HeaderMap>,
}

pub struct StreamShared {
    ctx: StreamContext,
    /// Receiver phase currently executing (0 = none).
    filter_phase: AtomicU8,
    cleaned: AtomicBool,
    route: ArcSwapOption<Route>,
    request_info: Mutex<RequestInfo>,
    response_override: Mutex<ResponseOverride>,
    hijack: Mutex<HijackSlot>,
    status_tx: watch::Sender<StreamStatus>,
    stream: Weak<DownstreamStream>,
}

impl StreamShared {
    pub fn new(id: StreamId, proxy_name: Arc<str>, stream: Weak<DownstreamStream>) -> Self {
        let request_info = RequestInfo::new();
        let (status_tx, _) = watch::channel(StreamStatus::Running);
        Self {
            ctx: StreamContext {
                stream_id: id,
                request_id: request_info.request_id,
                proxy_name,
            },
            filter_phase: AtomicU8::new(0),
            cleaned: AtomicBool::new(false),
            route: ArcSwapOption::empty(),
            request_info: Mutex::new(request_info),
            response_override: Mutex::new(ResponseOverride::default()),
            hijack: Mutex::new(HijackSlot::default()),
            status_tx,
            stream,
        }
    }

    /// Shared state with no owning stream, for driving a filter manager alone.
    pub fn detached(id: StreamId) -> Arc<Self> {
        Arc::new(Self::new(id, Arc::from("detached"), Weak::new()))
    }

    pub fn id(&self) -> StreamId {
        self.ctx.stream_id
    }

    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    /// The owning stream, if it is still alive.
    pub fn stream(&self) -> Option<Arc<DownstreamStream>> {
        self.stream.upgrade()
    }

    // --- Filter phase ---

    pub fn set_filter_phase(&self, phase: Option<ReceiverFilterPhase>) {
        let val = phase.map_or(0, |p| p as u8);
        self.filter_phase.store(val, Ordering::Release);
    }

    pub fn filter_phase(&self) -> Option<ReceiverFilterPhase> {
        ReceiverFilterPhase::from_u8(self.filter_phase.load(Ordering::Acquire))
    }

    // --- Cleanup guard ---

    /// Claim the right to tear the stream down. Exactly one caller ever gets `true`.
    pub fn try_mark_cleaned(&self) -> bool {
        self.cleaned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }

    // --- Routing output ---

    pub fn set_route(&self, route: Option<Arc<Route>>) {
        self.route.store(route);
    }

    pub fn route(&self) -> Option<Arc<Route>> {
        self.route.load_full()
    }

    // --- Request info ---

    pub fn request_info(&self) -> RequestInfo {
        lock(&self.request_info).clone()
    }

    pub fn update_request_info(&self, f: impl FnOnce(&mut RequestInfo)) {
        f(&mut lock(&self.request_info));
    }

    // --- Sender-side response overrides ---

    pub fn set_response_headers(&self, headers: HeaderMap) {
        lock(&self.response_override).headers = Some(headers);
    }

    pub fn set_response_data(&self, data: IoBuffer) {
        lock(&self.response_override).data = Some(data);
    }

    pub fn set_response_trailers(&self, trailers: HeaderMap) {
        lock(&self.response_override).trailers = Some(trailers);
    }

    /// Move pending replacements into the chain's working parts.
    pub fn apply_response_overrides(
        &self,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
    ) {
        let mut pending = lock(&self.response_override);
        if let Some(h) = pending.headers.take() {
            *headers = h;
        }
        if let Some(d) = pending.data.take() {
            *data = d;
        }
        if let Some(t) = pending.trailers.take() {
            *trailers = t;
        }
    }

    // --- Hijack replies ---

    /// Record a synthesized response. A later reply replaces an earlier one.
    ///
    /// Returns `false` once the stream has reached its sender filters; the
    /// reply is dropped then.
    pub fn set_hijack(&self, code: u16, mut headers: HeaderMap) -> bool {
        let mut slot = lock(&self.hijack);
        if slot.closed {
            return false;
        }
        headers.set(STATUS_HEADER, code.to_string());
        slot.reply = Some(Message::new(Some(headers), None, None));
        self.update_request_info(|info| info.response_code = Some(code));
        true
    }

    pub fn take_hijack(&self) -> Option<Message> {
        lock(&self.hijack).reply.take()
    }

    pub fn has_hijack(&self) -> bool {
        lock(&self.hijack).reply.is_some()
    }

    /// Stop accepting hijack replies and hand back one still pending.
    pub fn close_hijack(&self) -> Option<Message> {
        let mut slot = lock(&self.hijack);
        slot.closed = true;
        slot.reply.take()
    }

    // --- Status ---

    pub fn publish(&self, status: StreamStatus) {
        self.status_tx.send_replace(status);
    }

    pub fn status(&self) -> StreamStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }

    /// Drop everything a filter may have parked here.
    pub fn clear(&self) {
        *lock(&self.response_override) = ResponseOverride::default();
        lock(&self.hijack).reply.take();
        self.route.store(None);
        self.set_filter_phase(None);
    }
}

impl std::fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamShared")
            .field("id", &self.ctx.stream_id)
            .field("cleaned", &self.is_cleaned())
            .field("status", &self.status())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
