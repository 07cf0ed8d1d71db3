//! Per-listener proxy.
//!
//! # Responsibilities
//! - Resolve configured stream filters into factories once, at startup
//! - Create streams with freshly instantiated filter chains
//! - Track active streams and inject resets and shutdown

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::schema::ProxyConfig;
use crate::error::{ProxyError, TerminateReason};
use crate::filter::registry::{FilterRegistry, StreamFilterFactory};
use crate::observability::sink_for;
use crate::proxy::active::ActiveStreams;
use crate::proxy::ProxyDeps;
use crate::stream::downstream::{DownstreamStream, StreamSettings};
use crate::stream::phase::StreamId;
use crate::upstream::{ResponseSender, Routers};

pub struct Proxy {
    settings: StreamSettings,
    deps: ProxyDeps,
    factories: Vec<Arc<dyn StreamFilterFactory>>,
    active: Arc<ActiveStreams>,
}

impl Proxy {
    /// Build a proxy whose filters come from the built-in registry.
    pub fn new(config: &ProxyConfig, deps: ProxyDeps) -> Result<Self, ProxyError> {
        Self::with_registry(config, deps, &FilterRegistry::with_builtins())
    }

    pub fn with_registry(
        config: &ProxyConfig,
        deps: ProxyDeps,
        registry: &FilterRegistry,
    ) -> Result<Self, ProxyError> {
        let deps = if deps.stats_configured() {
            deps
        } else {
            deps.with_stats(sink_for(config))
        };
        let factories = config
            .stream_filters
            .iter()
            .map(|filter| registry.create(filter))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            proxy = %config.name,
            filters = factories.len(),
            stop_timeout_ms = config.timeouts.stop_timeout_ms,
            "Proxy configured"
        );

        Ok(Self {
            settings: StreamSettings::from(config),
            deps,
            factories,
            active: Arc::new(ActiveStreams::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.proxy_name
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Replace the settings new streams are created with.
    pub fn set_settings(&mut self, settings: StreamSettings) {
        self.settings = settings;
    }

    /// Append a factory applied to every stream created from now on.
    pub fn add_filter_factory(&mut self, factory: Arc<dyn StreamFilterFactory>) {
        self.factories.push(factory);
    }

    /// Swap the routing table. Streams already past `MatchRoute` keep their route.
    pub fn update_routers(&self, routers: Box<dyn Routers>) {
        self.deps.routers.update(routers);
        info!(proxy = %self.settings.proxy_name, "Routers updated");
    }

    /// Start a new transaction whose response is written through `response_sender`.
    pub fn new_stream(&self, response_sender: Arc<dyn ResponseSender>) -> Arc<DownstreamStream> {
        let stream = DownstreamStream::new(
            StreamId::next(),
            self.settings.clone(),
            self.deps.clone(),
            response_sender,
            Arc::downgrade(&self.active),
        );
        stream.create_filter_chain(&self.factories);
        self.active.insert(stream.clone());
        stream
    }

    pub fn get_stream(&self, id: StreamId) -> Option<Arc<DownstreamStream>> {
        self.active.get(id)
    }

    pub fn active_streams(&self) -> usize {
        self.active.len()
    }

    /// Abort one stream, e.g. on a downstream connection reset.
    pub fn reset_stream(&self, id: StreamId, reason: TerminateReason) -> bool {
        match self.active.get(id) {
            Some(stream) => stream.terminate(reason),
            None => {
                debug!(stream_id = %id, "Reset for unknown stream");
                false
            }
        }
    }

    /// Terminate every active stream. Returns how many were torn down here.
    pub fn shutdown(&self) -> usize {
        let terminated = self
            .active
            .snapshot()
            .into_iter()
            .filter(|stream| stream.terminate(TerminateReason::ProxyShutdown))
            .count();
        info!(proxy = %self.settings.proxy_name, terminated, "Proxy shut down");
        terminated
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("settings", &self.settings)
            .field("filters", &self.factories.len())
            .field("active", &self.active.len())
            .finish()
    }
}
