//! Stream stats.
//!
//! # Metrics
//! - `stream_proxy_streams_total` (counter): streams created, by proxy
//! - `stream_proxy_phase_completed_total` (counter): phases finished, by proxy and phase
//! - `stream_proxy_stream_terminated_total` (counter): aborted streams, by proxy and reason
//! - `stream_proxy_stream_cleaned_total` (counter): cleanups performed, by proxy
//! - `stream_proxy_filter_panics_total` (counter): filter callbacks that panicked, by proxy

use std::sync::Arc;

use crate::config::schema::ProxyConfig;
use crate::error::TerminateReason;
use crate::stream::phase::Phase;

/// Something worth counting happened to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    StreamCreated,
    PhaseCompleted(Phase),
    StreamTerminated(TerminateReason),
    StreamCleaned,
    FilterPanicked,
}

/// Destination for stream stats.
pub trait StatsSink: Send + Sync {
    fn record(&self, event: StatsEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn record(&self, _event: StatsEvent) {}
}

/// Sink backed by the `metrics` facade, labelled with the proxy name.
#[derive(Debug, Clone)]
pub struct MetricsStatsSink {
    proxy: Arc<str>,
}

impl MetricsStatsSink {
    pub fn new(proxy_name: impl Into<Arc<str>>) -> Self {
        Self {
            proxy: proxy_name.into(),
        }
    }
}

impl StatsSink for MetricsStatsSink {
    fn record(&self, event: StatsEvent) {
        let proxy = self.proxy.to_string();
        match event {
            StatsEvent::StreamCreated => {
                ::metrics::counter!("stream_proxy_streams_total", "proxy" => proxy).increment(1);
            }
            StatsEvent::PhaseCompleted(phase) => {
                ::metrics::counter!(
                    "stream_proxy_phase_completed_total",
                    "proxy" => proxy,
                    "phase" => phase.as_str()
                )
                .increment(1);
            }
            StatsEvent::StreamTerminated(reason) => {
                ::metrics::counter!(
                    "stream_proxy_stream_terminated_total",
                    "proxy" => proxy,
                    "reason" => reason.as_str()
                )
                .increment(1);
            }
            StatsEvent::StreamCleaned => {
                ::metrics::counter!("stream_proxy_stream_cleaned_total", "proxy" => proxy)
                    .increment(1);
            }
            StatsEvent::FilterPanicked => {
                ::metrics::counter!("stream_proxy_filter_panics_total", "proxy" => proxy)
                    .increment(1);
            }
        }
    }
}

/// The sink a proxy built from `config` should report to.
pub fn sink_for(config: &ProxyConfig) -> Arc<dyn StatsSink> {
    if config.observability.metrics_enabled {
        Arc::new(MetricsStatsSink::new(config.name.as_str()))
    } else {
        Arc::new(NoopStatsSink)
    }
}
