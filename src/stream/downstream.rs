//! Downstream stream: one request/response transaction.
//!
//! # Responsibilities
//! - Advance the transaction through its phases, one job at a time
//! - Run receiver filters between routing steps and sender filters on the response
//! - Act on chain outcomes: pause on `Stop`, jump on a resume request, clean up on `Terminate`
//! - Guarantee cleanup happens exactly once, whoever triggers it
//!
//! # Design Decisions
//! - `inner` is locked for the whole of a phase job; handlers never take it,
//!   they schedule a new job instead
//! - The cleanup guard lives in [`StreamShared`] so timers and transport
//!   callbacks can claim it without waiting for a running phase
//! - A paused stream arms a watchdog tagged with the pause generation, so a
//!   stale timer never terminates a stream that was resumed and paused again

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::schema::ProxyConfig;
use crate::error::{ProxyError, TerminateReason};
use crate::filter::handler::FilterSide;
use crate::filter::manager::{FilterChainBuilder, StreamFilterManager};
use crate::filter::registry::StreamFilterFactory;
use crate::filter::types::{
    ChainAbort, ChainOutcome, ReceiverFilterPhase, SenderFilterPhase, StatusConverter,
    StreamReceiverFilter, StreamSenderFilter,
};
use crate::observability::StatsEvent;
use crate::proxy::{ActiveStreams, ProxyDeps};
use crate::stream::message::{HeaderMap, IoBuffer, Message};
use crate::stream::phase::{Phase, StreamId};
use crate::stream::shared::{StreamShared, StreamStatus};
use crate::upstream::{HostSelection, ResponseSender};

/// Per-proxy knobs copied into every stream.
#[derive(Clone)]
pub struct StreamSettings {
    pub proxy_name: Arc<str>,
    /// Watchdog for paused streams. `None` waits forever.
    pub stop_timeout: Option<Duration>,
    pub max_phase_reentries: u32,
    /// Policy applied to receiver filter statuses before the chain acts on them.
    pub status_converter: Option<Arc<StatusConverter>>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

impl From<&ProxyConfig> for StreamSettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            proxy_name: Arc::from(config.name.as_str()),
            stop_timeout: config.timeouts.stop_timeout(),
            max_phase_reentries: config.limits.max_phase_reentries,
            status_converter: None,
        }
    }
}

impl std::fmt::Debug for StreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSettings")
            .field("proxy_name", &self.proxy_name)
            .field("stop_timeout", &self.stop_timeout)
            .field("max_phase_reentries", &self.max_phase_reentries)
            .field("status_converter", &self.status_converter.is_some())
            .finish()
    }
}

/// What the driver does after a phase ran.
enum Step {
    /// Phase done, move to the next one.
    Next,
    /// Continue at the given phase without counting a re-entry.
    Goto(Phase),
    /// A filter asked to run the given phase again.
    Reenter(Phase),
    /// Stop driving until an external event schedules a new job.
    Wait,
    Finish(TerminateReason),
}

struct StreamInner {
    phase: Phase,
    filter_manager: StreamFilterManager,
    request: Message,
    response: Message,
    host: Option<HostSelection>,
    reentries: u32,
    paused: bool,
    pause_generation: u64,
    /// Chain index of the filter that stopped the current pause.
    resume_index: Option<usize>,
}

pub struct DownstreamStream {
    id: StreamId,
    shared: Arc<StreamShared>,
    deps: ProxyDeps,
    settings: StreamSettings,
    response_sender: Arc<dyn ResponseSender>,
    active: Weak<ActiveStreams>,
    inner: Mutex<StreamInner>,
}

impl DownstreamStream {
    pub fn new(
        id: StreamId,
        settings: StreamSettings,
        deps: ProxyDeps,
        response_sender: Arc<dyn ResponseSender>,
        active: Weak<ActiveStreams>,
    ) -> Arc<Self> {
        let stream = Arc::new_cyclic(|weak| {
            let shared = Arc::new(StreamShared::new(
                id,
                settings.proxy_name.clone(),
                weak.clone(),
            ));
            Self {
                id,
                inner: Mutex::new(StreamInner {
                    phase: Phase::Init,
                    filter_manager: StreamFilterManager::new(shared.clone()),
                    request: Message::default(),
                    response: Message::default(),
                    host: None,
                    reentries: 0,
                    paused: false,
                    pause_generation: 0,
                    resume_index: None,
                }),
                shared,
                deps,
                settings,
                response_sender,
                active,
            }
        });
        stream.deps.stats.record(StatsEvent::StreamCreated);
        debug!(stream_id = %id, proxy = %stream.settings.proxy_name, "Stream created");
        stream
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    pub fn status(&self) -> StreamStatus {
        self.shared.status()
    }

    /// Watch the stream's progress, e.g. to await `Finished`.
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.shared.subscribe()
    }

    pub fn is_cleaned(&self) -> bool {
        self.shared.is_cleaned()
    }

    /// Phase the stream is at or paused in.
    pub fn phase(&self) -> Phase {
        self.lock_inner().phase
    }

    /// Pending resume target recorded by the receiver chain.
    pub fn receiver_filters_again_phase(&self) -> Option<Phase> {
        self.lock_inner().filter_manager.receiver_filters_again_phase()
    }

    /// Snapshot of the response as it currently stands.
    pub fn response(&self) -> Message {
        self.lock_inner().response.clone()
    }

    // --- Filter registration ---

    pub fn add_stream_receiver_filter(
        &self,
        filter: Box<dyn StreamReceiverFilter>,
        phase: ReceiverFilterPhase,
    ) {
        self.lock_inner()
            .filter_manager
            .add_stream_receiver_filter(filter, phase);
    }

    pub fn add_stream_sender_filter(
        &self,
        filter: Box<dyn StreamSenderFilter>,
        phase: SenderFilterPhase,
    ) {
        self.lock_inner()
            .filter_manager
            .add_stream_sender_filter(filter, phase);
    }

    /// Let every factory install its filters on this stream.
    pub fn create_filter_chain(&self, factories: &[Arc<dyn StreamFilterFactory>]) {
        let mut inner = self.lock_inner();
        for factory in factories {
            factory.create_filter_chain(&mut inner.filter_manager);
        }
        trace!(
            stream_id = %self.id,
            receivers = inner.filter_manager.receiver_filter_count(),
            senders = inner.filter_manager.sender_filter_count(),
            "Filter chain created"
        );
    }

    // --- Entry points ---

    /// Hand the decoded request to the stream and start processing it.
    pub fn on_receive(
        self: &Arc<Self>,
        headers: Option<HeaderMap>,
        data: Option<IoBuffer>,
        trailers: Option<HeaderMap>,
    ) {
        let stream = self.clone();
        self.deps.pool.schedule(Box::new(move || {
            let mut inner = stream.lock_inner();
            if stream.shared.is_cleaned() {
                return;
            }
            if inner.phase != Phase::Init {
                warn!(
                    stream_id = %stream.id,
                    phase = %inner.phase,
                    "Request received twice, ignoring"
                );
                return;
            }
            inner.request = Message::new(headers, data, trailers);
            stream.drive(&mut inner, 0);
        }));
    }

    /// Resume a paused stream.
    ///
    /// A pending hijack reply takes precedence and short-circuits to the
    /// sender filters; otherwise the stopped chain continues at the filter
    /// after the one that stopped it. No-op unless the stream is paused.
    pub fn continue_processing(self: &Arc<Self>) {
        let stream = self.clone();
        self.deps.pool.schedule(Box::new(move || stream.resume(None)));
    }

    /// Resume on behalf of one filter. Only the filter whose `Stop` paused
    /// the stream can release it.
    pub(crate) fn continue_from_filter(self: &Arc<Self>, side: FilterSide, index: usize) {
        let stream = self.clone();
        self.deps
            .pool
            .schedule(Box::new(move || stream.resume(Some((side, index)))));
    }

    /// Tear the stream down. Returns `false` if cleanup already happened.
    ///
    /// Safe to call from any thread, including from inside a filter callback.
    pub fn terminate(self: &Arc<Self>, reason: TerminateReason) -> bool {
        if !self.begin_cleanup(reason) {
            return false;
        }
        let stream = self.clone();
        self.deps.pool.schedule(Box::new(move || {
            let mut inner = stream.lock_inner();
            stream.release(&mut inner, reason);
        }));
        true
    }

    /// Run the sender chain directly over the given response parts.
    ///
    /// Missing parts are created empty, so the stored response is always
    /// fully populated afterwards. A terminated chain cleans the stream up.
    pub fn run_sender_filter(
        &self,
        phase: SenderFilterPhase,
        headers: Option<HeaderMap>,
        data: Option<IoBuffer>,
        trailers: Option<HeaderMap>,
        converter: Option<&StatusConverter>,
    ) -> ChainOutcome {
        let mut inner = self.lock_inner();
        inner.response = Message::new(headers, data, trailers);
        let outcome = {
            let StreamInner {
                filter_manager,
                response,
                ..
            } = &mut *inner;
            let (h, d, t) = response.parts_mut();
            filter_manager.run_sender_filter(self.shared.context(), phase, h, d, t, converter)
        };
        if let ChainOutcome::Terminated(abort) = &outcome {
            self.record_abort(abort);
            self.finish(&mut inner, abort.reason());
        }
        outcome
    }

    // --- Driver ---

    fn drive(self: &Arc<Self>, inner: &mut StreamInner, mut start: usize) {
        loop {
            if self.shared.is_cleaned() {
                return;
            }
            let phase = inner.phase;
            let step = match phase {
                Phase::Init => Step::Next,
                Phase::DownFilter => self.receive(inner, ReceiverFilterPhase::BeforeRoute, start),
                Phase::MatchRoute => self.match_route(inner),
                Phase::DownFilterAfterRoute => {
                    self.receive(inner, ReceiverFilterPhase::AfterRoute, start)
                }
                Phase::ChooseHost => self.choose_host(inner),
                Phase::DownFilterAfterChooseHost => {
                    self.receive(inner, ReceiverFilterPhase::AfterChooseHost, start)
                }
                Phase::DownRecvHeader => self.forward(inner),
                Phase::WaitNotify => Step::Wait,
                Phase::UpFilter => {
                    if let Some(reply) = self.shared.close_hijack() {
                        debug!(
                            stream_id = %self.id,
                            code = ?reply.status_code(),
                            "Dropping hijack reply raised too late"
                        );
                    }
                    self.send(inner, start)
                }
                Phase::UpRecvHeader => self.respond(inner),
                Phase::End => return,
            };
            start = 0;

            match step {
                Step::Next => {
                    self.deps.stats.record(StatsEvent::PhaseCompleted(phase));
                    inner.phase = phase.next();
                    trace!(
                        stream_id = %self.id,
                        from = %phase,
                        to = %inner.phase,
                        "Phase completed"
                    );
                }
                Step::Goto(target) => inner.phase = target,
                Step::Reenter(target) => {
                    inner.reentries += 1;
                    if inner.reentries > self.settings.max_phase_reentries {
                        warn!(
                            stream_id = %self.id,
                            target = %target,
                            limit = self.settings.max_phase_reentries,
                            "Too many phase re-entries"
                        );
                        self.finish(inner, TerminateReason::TooManyReentries);
                        return;
                    }
                    debug!(stream_id = %self.id, from = %phase, to = %target, "Re-entering phase");
                    inner.phase = target;
                }
                Step::Wait => return,
                Step::Finish(reason) => {
                    self.finish(inner, reason);
                    return;
                }
            }
        }
    }

    fn receive(
        self: &Arc<Self>,
        inner: &mut StreamInner,
        phase: ReceiverFilterPhase,
        start: usize,
    ) -> Step {
        let outcome = {
            let StreamInner {
                filter_manager,
                request,
                ..
            } = &mut *inner;
            let (headers, data, trailers) = request.parts_mut();
            filter_manager.run_receiver_filter_from(
                self.shared.context(),
                phase,
                start,
                headers,
                data,
                trailers,
                self.settings.status_converter.as_deref(),
            )
        };

        match outcome {
            ChainOutcome::Completed => {
                if self.shared.has_hijack() {
                    self.short_circuit(inner)
                } else {
                    Step::Next
                }
            }
            ChainOutcome::ResumeAt(target) => {
                let target = inner
                    .filter_manager
                    .take_receiver_filters_again_phase()
                    .unwrap_or(target);
                Step::Reenter(target)
            }
            ChainOutcome::Stopped { index } => {
                if self.shared.has_hijack() {
                    self.short_circuit(inner)
                } else {
                    self.pause(inner, index)
                }
            }
            ChainOutcome::Terminated(abort) => {
                self.record_abort(&abort);
                Step::Finish(abort.reason())
            }
        }
    }

    fn match_route(&self, inner: &mut StreamInner) -> Step {
        let empty = HeaderMap::new();
        let headers = inner.request.headers.as_ref().unwrap_or(&empty);
        match self.deps.routers.match_route(headers) {
            Some(route) => {
                debug!(stream_id = %self.id, route = %route.name, "Route matched");
                self.shared
                    .update_request_info(|info| info.route_name = Some(route.name.clone()));
                self.shared.set_route(Some(route));
                Step::Next
            }
            None => {
                warn!(stream_id = %self.id, "No route matched");
                Step::Finish(TerminateReason::NoRoute)
            }
        }
    }

    fn choose_host(&self, inner: &mut StreamInner) -> Step {
        let Some(route) = self.shared.route() else {
            return Step::Finish(TerminateReason::NoRoute);
        };
        let empty = HeaderMap::new();
        let headers = inner.request.headers.as_ref().unwrap_or(&empty);
        match self.deps.cluster_manager.choose_host(&route, headers) {
            Ok(selection) => {
                debug!(
                    stream_id = %self.id,
                    cluster = %selection.snapshot.name,
                    host = %selection.host.address,
                    "Host chosen"
                );
                self.shared.update_request_info(|info| {
                    info.upstream_host = Some(selection.host.address.clone())
                });
                inner.host = Some(selection);
                Step::Next
            }
            Err(e) => {
                warn!(
                    stream_id = %self.id,
                    route = %route.name,
                    error = %e,
                    "Host selection failed"
                );
                Step::Finish(e.terminate_reason())
            }
        }
    }

    /// Hand the request to the transport. The response comes back through
    /// an [`UpstreamResponseHandle`] job once the stream waits at `WaitNotify`.
    fn forward(self: &Arc<Self>, inner: &mut StreamInner) -> Step {
        let Some(host) = inner.host.as_ref().map(|s| s.host.clone()) else {
            return Step::Finish(TerminateReason::NoHealthyHost);
        };
        let handle = UpstreamResponseHandle {
            stream: Arc::downgrade(self),
        };
        trace!(stream_id = %self.id, host = %host.address, "Forwarding upstream");
        self.deps
            .upstream
            .forward(host, inner.request.clone(), handle);
        Step::Next
    }

    fn send(self: &Arc<Self>, inner: &mut StreamInner, start: usize) -> Step {
        let outcome = {
            let StreamInner {
                filter_manager,
                response,
                ..
            } = &mut *inner;
            let (headers, data, trailers) = response.parts_mut();
            filter_manager.run_sender_filter_from(
                self.shared.context(),
                SenderFilterPhase::BeforeSend,
                start,
                headers,
                data,
                trailers,
                None,
            )
        };

        match outcome {
            ChainOutcome::Completed | ChainOutcome::ResumeAt(_) => Step::Next,
            ChainOutcome::Stopped { index } => self.pause(inner, index),
            ChainOutcome::Terminated(abort) => {
                self.record_abort(&abort);
                Step::Finish(abort.reason())
            }
        }
    }

    fn respond(&self, inner: &mut StreamInner) -> Step {
        {
            let (headers, data, trailers) = inner.response.parts_mut();
            self.shared.apply_response_overrides(headers, data, trailers);
        }
        let response = std::mem::take(&mut inner.response);
        if let Some(code) = response.status_code() {
            self.shared
                .update_request_info(|info| info.response_code = Some(code));
        }
        match self.response_sender.send_response(self.id, response) {
            Ok(()) => {
                self.deps
                    .stats
                    .record(StatsEvent::PhaseCompleted(Phase::UpRecvHeader));
                Step::Finish(TerminateReason::Completed)
            }
            Err(e) => {
                warn!(stream_id = %self.id, error = %e, "Downstream write failed");
                Step::Finish(e.terminate_reason())
            }
        }
    }

    /// Replace the pending response with the hijack reply and skip upstream.
    fn short_circuit(&self, inner: &mut StreamInner) -> Step {
        match self.shared.take_hijack() {
            Some(reply) => {
                debug!(
                    stream_id = %self.id,
                    phase = %inner.phase,
                    code = ?reply.status_code(),
                    "Hijack reply short-circuits upstream"
                );
                inner.response = reply;
                Step::Goto(Phase::UpFilter)
            }
            None => Step::Next,
        }
    }

    // --- Pause / resume ---

    fn pause(self: &Arc<Self>, inner: &mut StreamInner, index: usize) -> Step {
        if self.shared.is_cleaned() {
            return Step::Wait;
        }
        inner.paused = true;
        inner.resume_index = Some(index);
        inner.pause_generation += 1;
        self.shared.publish(StreamStatus::Paused(inner.phase));
        debug!(stream_id = %self.id, phase = %inner.phase, filter_index = index, "Stream paused");

        if let Some(timeout) = self.settings.stop_timeout {
            let generation = inner.pause_generation;
            let stream = Arc::downgrade(self);
            self.deps.pool.schedule_after(
                timeout,
                Box::new(move || {
                    if let Some(stream) = stream.upgrade() {
                        stream.on_stop_timeout(generation);
                    }
                }),
            );
        }
        Step::Wait
    }

    /// `caller` names the filter asking to resume; `None` resumes any pause.
    fn resume(self: &Arc<Self>, caller: Option<(FilterSide, usize)>) {
        let mut inner = self.lock_inner();
        if self.shared.is_cleaned() || !inner.paused {
            return;
        }
        if let Some((side, index)) = caller {
            let side_paused = match side {
                FilterSide::Receiver => inner.phase < Phase::UpFilter,
                FilterSide::Sender => inner.phase == Phase::UpFilter,
            };
            if !side_paused || inner.resume_index != Some(index) {
                debug!(
                    stream_id = %self.id,
                    phase = %inner.phase,
                    filter_index = index,
                    "Ignoring resume from a filter that did not stop the stream"
                );
                return;
            }
        }
        inner.paused = false;
        let resume_index = inner.resume_index.take();
        self.shared.publish(StreamStatus::Running);

        let start = if inner.phase < Phase::UpFilter && self.shared.has_hijack() {
            if let Step::Goto(target) = self.short_circuit(&mut inner) {
                inner.phase = target;
            }
            0
        } else {
            resume_index.map_or(0, |i| i + 1)
        };
        debug!(stream_id = %self.id, phase = %inner.phase, start, "Stream resumed");
        self.drive(&mut inner, start);
    }

    fn on_stop_timeout(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if !inner.paused || inner.pause_generation != generation {
            return;
        }
        warn!(
            stream_id = %self.id,
            phase = %inner.phase,
            timeout = ?self.settings.stop_timeout,
            "Paused stream was never resumed"
        );
        self.finish(&mut inner, TerminateReason::StopTimeout);
    }

    fn on_upstream_response(self: &Arc<Self>, response: Message) {
        let mut inner = self.lock_inner();
        if self.shared.is_cleaned() || inner.phase != Phase::WaitNotify {
            debug!(stream_id = %self.id, phase = %inner.phase, "Dropping late upstream response");
            return;
        }
        inner.response = self.shared.close_hijack().unwrap_or(response);
        self.deps
            .stats
            .record(StatsEvent::PhaseCompleted(Phase::WaitNotify));
        inner.phase = Phase::UpFilter;
        self.drive(&mut inner, 0);
    }

    // --- Cleanup ---

    fn record_abort(&self, abort: &ChainAbort) {
        if let ChainAbort::Panic { .. } = abort {
            self.deps.stats.record(StatsEvent::FilterPanicked);
        }
    }

    /// Cleanup from a job that already holds `inner`.
    fn finish(&self, inner: &mut StreamInner, reason: TerminateReason) {
        if self.begin_cleanup(reason) {
            self.release(inner, reason);
        }
    }

    /// Claim the cleanup guard and do the parts that do not need `inner`.
    fn begin_cleanup(&self, reason: TerminateReason) -> bool {
        if !self.shared.try_mark_cleaned() {
            trace!(stream_id = %self.id, reason = %reason, "Stream already cleaned");
            return false;
        }

        if reason.is_abort() {
            self.deps.stats.record(StatsEvent::StreamTerminated(reason));
            info!(stream_id = %self.id, reason = %reason, "Stream terminated");
        } else {
            debug!(
                stream_id = %self.id,
                duration_ms = self.shared.request_info().duration().as_millis() as u64,
                "Stream completed"
            );
        }
        self.deps.stats.record(StatsEvent::StreamCleaned);
        self.shared.clear();
        if let Some(active) = self.active.upgrade() {
            active.remove(self.id);
        }
        true
    }

    fn release(&self, inner: &mut StreamInner, reason: TerminateReason) {
        inner.request = Message::default();
        inner.response = Message::default();
        inner.host = None;
        inner.paused = false;
        inner.resume_index = None;
        inner.phase = Phase::End;
        inner.filter_manager.on_destroy();
        self.shared.publish(StreamStatus::Finished(reason));
    }

    fn lock_inner(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DownstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamStream")
            .field("id", &self.id)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

/// Completion handle given to the upstream transport for one forwarded request.
#[derive(Debug)]
pub struct UpstreamResponseHandle {
    stream: Weak<DownstreamStream>,
}

impl UpstreamResponseHandle {
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream.upgrade().map(|s| s.id())
    }

    /// Deliver the upstream response; the stream continues with its sender filters.
    pub fn on_response(self, response: Message) {
        if let Some(stream) = self.stream.upgrade() {
            let job_stream = stream.clone();
            stream
                .deps
                .pool
                .schedule(Box::new(move || job_stream.on_upstream_response(response)));
        }
    }

    /// Report that no response will come.
    pub fn on_failure(self, error: ProxyError) {
        if let Some(stream) = self.stream.upgrade() {
            warn!(stream_id = %stream.id, error = %error, "Upstream request failed");
            stream.terminate(TerminateReason::UpstreamFailure);
        }
    }
}
