//! Shared mocks for stream integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_proxy::config::schema::ProxyConfig;
use stream_proxy::error::{ProxyError, TerminateReason};
use stream_proxy::filter::{
    ReceiverFilterHandler, ReceiverFilterPhase, SenderFilterHandler, StreamFilterStatus,
    StreamReceiverFilter, StreamSenderFilter,
};
use stream_proxy::observability::{StatsEvent, StatsSink};
use stream_proxy::proxy::{Proxy, ProxyDeps, TokioWorkerPool};
use stream_proxy::stream::{
    DownstreamStream, HeaderMap, IoBuffer, Message, StreamContext, StreamId, StreamStatus,
    UpstreamResponseHandle, STATUS_HEADER,
};
use stream_proxy::upstream::{
    ClusterManager, ClusterSnapshot, Host, HostSelection, ResponseSender, Route, Routers,
    RoutersWrapper, UpstreamTransport,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

// --- Filters ---

/// What a test filter observed.
#[derive(Clone, Default)]
pub struct Tracker {
    calls: Arc<AtomicUsize>,
    phases: Arc<Mutex<Vec<Option<ReceiverFilterPhase>>>>,
    handler: Arc<Mutex<Option<ReceiverFilterHandler>>>,
}

impl Tracker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current phase reported by the handler at each invocation.
    pub fn phases(&self) -> Vec<Option<ReceiverFilterPhase>> {
        self.phases.lock().unwrap().clone()
    }

    /// Handler the filter was registered with (receiver filters only).
    pub fn handler(&self) -> ReceiverFilterHandler {
        self.handler.lock().unwrap().clone().expect("filter was never registered")
    }
}

type ReceiveFn =
    dyn FnMut(usize, &ReceiverFilterHandler, &mut HeaderMap) -> StreamFilterStatus + Send;

struct ScriptedReceiver {
    tracker: Tracker,
    script: Box<ReceiveFn>,
}

impl StreamReceiverFilter for ScriptedReceiver {
    fn on_receive(
        &mut self,
        _ctx: &StreamContext,
        headers: &mut HeaderMap,
        _data: &mut IoBuffer,
        _trailers: &mut HeaderMap,
    ) -> StreamFilterStatus {
        let call = self.tracker.calls.fetch_add(1, Ordering::SeqCst);
        let handler = self.tracker.handler();
        self.tracker.phases.lock().unwrap().push(handler.current_phase());
        (self.script)(call, &handler, headers)
    }

    fn set_receive_filter_handler(&mut self, handler: ReceiverFilterHandler) {
        *self.tracker.handler.lock().unwrap() = Some(handler);
    }
}

/// Receiver filter that always returns `status`.
pub fn receiver(status: StreamFilterStatus) -> (Box<dyn StreamReceiverFilter>, Tracker) {
    scripted_receiver(move |_, _, _| status)
}

/// Receiver filter driven by a closure receiving the zero-based call number.
pub fn scripted_receiver<F>(script: F) -> (Box<dyn StreamReceiverFilter>, Tracker)
where
    F: FnMut(usize, &ReceiverFilterHandler, &mut HeaderMap) -> StreamFilterStatus + Send + 'static,
{
    let tracker = Tracker::default();
    let filter = ScriptedReceiver {
        tracker: tracker.clone(),
        script: Box::new(script),
    };
    (Box::new(filter), tracker)
}

type SendFn =
    dyn FnMut(&SenderFilterHandler, &mut HeaderMap, &mut IoBuffer) -> StreamFilterStatus + Send;

struct ScriptedSender {
    tracker: Tracker,
    handler: Option<SenderFilterHandler>,
    script: Box<SendFn>,
}

impl StreamSenderFilter for ScriptedSender {
    fn append(
        &mut self,
        _ctx: &StreamContext,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        _trailers: &mut HeaderMap,
    ) -> StreamFilterStatus {
        self.tracker.calls.fetch_add(1, Ordering::SeqCst);
        let handler = self.handler.clone().expect("filter was never registered");
        (self.script)(&handler, headers, data)
    }

    fn set_sender_filter_handler(&mut self, handler: SenderFilterHandler) {
        self.handler = Some(handler);
    }
}

pub fn sender(status: StreamFilterStatus) -> (Box<dyn StreamSenderFilter>, Tracker) {
    scripted_sender(move |_, _, _| status)
}

pub fn scripted_sender<F>(script: F) -> (Box<dyn StreamSenderFilter>, Tracker)
where
    F: FnMut(&SenderFilterHandler, &mut HeaderMap, &mut IoBuffer) -> StreamFilterStatus
        + Send
        + 'static,
{
    let tracker = Tracker::default();
    let filter = ScriptedSender {
        tracker: tracker.clone(),
        handler: None,
        script: Box::new(script),
    };
    (Box::new(filter), tracker)
}

// --- Collaborators ---

/// Routes on the `x-service` request header.
#[derive(Default)]
pub struct HeaderRouters {
    routes: HashMap<String, Arc<Route>>,
    calls: Arc<AtomicUsize>,
}

impl HeaderRouters {
    pub fn new(services: &[&str]) -> Self {
        let routes = services
            .iter()
            .map(|s| (s.to_string(), Arc::new(Route::new(*s, format!("{}-cluster", s)))))
            .collect();
        Self {
            routes,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Routers for HeaderRouters {
    fn match_route(&self, headers: &HeaderMap) -> Option<Arc<Route>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        headers.get("x-service").and_then(|s| self.routes.get(s).cloned())
    }
}

#[derive(Default)]
pub struct MockClusterManager {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl ClusterManager for MockClusterManager {
    fn choose_host(
        &self,
        route: &Route,
        _headers: &HeaderMap,
    ) -> Result<HostSelection, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProxyError::NoHealthyHost {
                cluster: route.cluster.clone(),
            });
        }
        Ok(HostSelection {
            snapshot: Arc::new(ClusterSnapshot {
                name: route.cluster.clone(),
                host_count: 1,
            }),
            host: Arc::new(Host::new("10.0.0.1:8080", route.cluster.clone())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
    /// Answer immediately with this status and body "upstream".
    Respond(u16),
    Fail,
    /// Keep the handle for the test to complete.
    Hold,
}

pub struct MockUpstream {
    mode: UpstreamMode,
    pub forwarded: Mutex<Vec<Message>>,
    pub held: Mutex<Vec<UpstreamResponseHandle>>,
}

impl MockUpstream {
    pub fn new(mode: UpstreamMode) -> Self {
        Self {
            mode,
            forwarded: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn forwarded(&self) -> Vec<Message> {
        self.forwarded.lock().unwrap().clone()
    }

    pub fn take_held(&self) -> Option<UpstreamResponseHandle> {
        self.held.lock().unwrap().pop()
    }
}

impl UpstreamTransport for MockUpstream {
    fn forward(&self, _host: Arc<Host>, request: Message, handle: UpstreamResponseHandle) {
        self.forwarded.lock().unwrap().push(request);
        match self.mode {
            UpstreamMode::Respond(code) => handle.on_response(response(code, "upstream")),
            UpstreamMode::Fail => {
                handle.on_failure(ProxyError::UpstreamFailure("connect refused".into()))
            }
            UpstreamMode::Hold => self.held.lock().unwrap().push(handle),
        }
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub fail: bool,
    pub sent: Mutex<Vec<(StreamId, Message)>>,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(StreamId, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ResponseSender for RecordingSender {
    fn send_response(&self, stream_id: StreamId, response: Message) -> Result<(), ProxyError> {
        if self.fail {
            return Err(ProxyError::DownstreamWrite("connection reset by peer".into()));
        }
        self.sent.lock().unwrap().push((stream_id, response));
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingStats {
    events: Mutex<Vec<StatsEvent>>,
}

impl CountingStats {
    pub fn count(&self, event: StatsEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|e| **e == event).count()
    }
}

impl StatsSink for CountingStats {
    fn record(&self, event: StatsEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// --- Harness ---

pub struct Harness {
    pub proxy: Proxy,
    pub router_calls: Arc<AtomicUsize>,
    pub clusters: Arc<MockClusterManager>,
    pub upstream: Arc<MockUpstream>,
    pub sender: Arc<RecordingSender>,
    pub stats: Arc<CountingStats>,
}

pub struct HarnessBuilder {
    config: ProxyConfig,
    services: Vec<&'static str>,
    upstream: UpstreamMode,
    cluster_fail: bool,
    sender: RecordingSender,
}

impl HarnessBuilder {
    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn services(mut self, services: &[&'static str]) -> Self {
        self.services = services.to_vec();
        self
    }

    pub fn upstream(mut self, mode: UpstreamMode) -> Self {
        self.upstream = mode;
        self
    }

    pub fn cluster_fails(mut self) -> Self {
        self.cluster_fail = true;
        self
    }

    pub fn sender_fails(mut self) -> Self {
        self.sender = RecordingSender::failing();
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Harness {
        let routers = HeaderRouters::new(&self.services);
        let router_calls = routers.calls.clone();
        let clusters = Arc::new(MockClusterManager {
            fail: self.cluster_fail,
            ..Default::default()
        });
        let upstream = Arc::new(MockUpstream::new(self.upstream));
        let stats = Arc::new(CountingStats::default());

        let deps = ProxyDeps::new(
            Arc::new(RoutersWrapper::new(Box::new(routers))),
            clusters.clone(),
            upstream.clone(),
            Arc::new(TokioWorkerPool::current()),
        )
        .with_stats(stats.clone());

        Harness {
            proxy: Proxy::new(&self.config, deps).expect("proxy config should be valid"),
            router_calls,
            clusters,
            upstream,
            sender: Arc::new(self.sender),
            stats,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        config: test_config(),
        services: vec!["web"],
        upstream: UpstreamMode::Respond(200),
        cluster_fail: false,
        sender: RecordingSender::default(),
    }
}

impl Harness {
    pub fn new_stream(&self) -> Arc<DownstreamStream> {
        self.proxy.new_stream(self.sender.clone())
    }

    pub fn router_calls(&self) -> usize {
        self.router_calls.load(Ordering::SeqCst)
    }
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.name = "test".into();
    config.observability.metrics_enabled = false;
    config
}

// --- Messages ---

/// Request headers routed to `service`.
pub fn request_headers(service: &str) -> HeaderMap {
    [("x-service", service), ("host", "example.com")].into_iter().collect()
}

pub fn response(code: u16, body: &str) -> Message {
    Message::new(
        Some([(STATUS_HEADER, code.to_string())].into_iter().collect()),
        Some(IoBuffer::from(body.as_bytes())),
        None,
    )
}

/// Send a routed request into `stream`.
pub fn start(stream: &Arc<DownstreamStream>, service: &str) {
    stream.on_receive(Some(request_headers(service)), None, None);
}

// --- Waiting ---

async fn wait_status(
    stream: &DownstreamStream,
    pred: impl FnMut(&StreamStatus) -> bool,
) -> StreamStatus {
    let mut rx = stream.subscribe();
    let status = tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(pred))
        .await
        .expect("stream did not settle in time")
        .expect("status channel closed");
    *status
}

/// Wait until cleanup finished and return its reason.
pub async fn finished(stream: &DownstreamStream) -> TerminateReason {
    match wait_status(stream, |s| matches!(s, StreamStatus::Finished(_))).await {
        StreamStatus::Finished(reason) => reason,
        other => panic!("unexpected status {:?}", other),
    }
}

/// Wait until the stream pauses on a `Stop`.
pub async fn paused(stream: &DownstreamStream) {
    wait_status(stream, |s| matches!(s, StreamStatus::Paused(_))).await;
}
