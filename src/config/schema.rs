//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::types::ReceiverFilterPhase;

/// Root configuration for one proxy (listener).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy identifier for logging/stats.
    pub name: String,

    /// Stream filters instantiated for every new stream, in order.
    pub stream_filters: Vec<FilterConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Safety limits on stream processing.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: "proxy".to_string(),
            stream_filters: Vec::new(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// One configured stream filter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Registered filter name (e.g., "set_header").
    pub name: String,

    /// Receiver phase for filters that run on the request path.
    #[serde(default)]
    pub phase: Option<ReceiverFilterPhase>,

    /// Filter-specific settings, parsed by the filter's factory.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl FilterConfig {
    pub fn new(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            phase: None,
            config,
        }
    }

    pub fn with_phase(mut self, phase: ReceiverFilterPhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a stream may stay paused on a filter `Stop` before it is
    /// terminated, in milliseconds. 0 disables the watchdog.
    pub stop_timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_ms > 0).then(|| Duration::from_millis(self.stop_timeout_ms))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 30_000,
        }
    }
}

/// Limits on stream processing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of MatchRoute/ChooseHost re-entries per stream.
    pub max_phase_reentries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_phase_reentries: 8,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit stream counters through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}
