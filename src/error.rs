//! Error types and termination reasons.

use thiserror::Error;

/// Errors surfaced by collaborators, filters and configuration wiring.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// The router found no route for the request headers.
    #[error("no route matched the request")]
    NoRoute,

    /// The cluster behind a route had no host to offer.
    #[error("no healthy host in cluster {cluster}")]
    NoHealthyHost { cluster: String },

    /// The upstream transport failed to produce a response.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// Writing the response downstream failed.
    #[error("downstream write failed: {0}")]
    DownstreamWrite(String),

    /// A filter callback panicked.
    #[error("filter #{index} panicked: {message}")]
    FilterPanic { index: usize, message: String },

    /// A configured filter name has no registered factory.
    #[error("unknown stream filter: {0}")]
    UnknownFilter(String),

    /// A filter factory rejected its configuration.
    #[error("invalid config for filter {name}: {message}")]
    FilterConfig { name: String, message: String },
}

impl ProxyError {
    /// The termination reason this failure maps to when it ends a stream.
    pub fn terminate_reason(&self) -> TerminateReason {
        match self {
            ProxyError::NoRoute => TerminateReason::NoRoute,
            ProxyError::NoHealthyHost { .. } => TerminateReason::NoHealthyHost,
            ProxyError::UpstreamFailure(_) => TerminateReason::UpstreamFailure,
            ProxyError::DownstreamWrite(_) => TerminateReason::DownstreamWriteFailure,
            ProxyError::FilterPanic { .. } => TerminateReason::FilterPanic,
            ProxyError::UnknownFilter(_) | ProxyError::FilterConfig { .. } => {
                TerminateReason::FilterTerminated
            }
        }
    }
}

/// Why a stream reached cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminateReason {
    /// The response was written downstream.
    Completed,
    /// A filter returned `Terminate` or asked for termination through its handler.
    FilterTerminated,
    /// A filter callback panicked.
    FilterPanic,
    NoRoute,
    NoHealthyHost,
    UpstreamFailure,
    DownstreamWriteFailure,
    /// A `Stop` was never resumed before the watchdog fired.
    StopTimeout,
    /// Filters requested too many phase jumps.
    TooManyReentries,
    /// The downstream connection reset the stream.
    DownstreamReset,
    ProxyShutdown,
}

impl TerminateReason {
    /// Stable label for stats and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::Completed => "completed",
            TerminateReason::FilterTerminated => "filter_terminated",
            TerminateReason::FilterPanic => "filter_panic",
            TerminateReason::NoRoute => "no_route",
            TerminateReason::NoHealthyHost => "no_healthy_host",
            TerminateReason::UpstreamFailure => "upstream_failure",
            TerminateReason::DownstreamWriteFailure => "downstream_write_failure",
            TerminateReason::StopTimeout => "stop_timeout",
            TerminateReason::TooManyReentries => "too_many_reentries",
            TerminateReason::DownstreamReset => "downstream_reset",
            TerminateReason::ProxyShutdown => "proxy_shutdown",
        }
    }

    /// True for every reason other than normal completion.
    pub fn is_abort(&self) -> bool {
        !matches!(self, TerminateReason::Completed)
    }
}

impl std::fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
