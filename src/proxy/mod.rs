//! Per-listener proxy wiring.
//!
//! # Data Flow
//! ```text
//! ProxyConfig ──► listener.rs (Proxy::new)
//!                   ├─ filter registry → StreamFilterFactory list
//!                   └─ ProxyDeps (routers, cluster manager, transport, stats, pool)
//! connection layer ──► Proxy::new_stream ──► DownstreamStream (filters instantiated)
//!                                              └─ registered in active.rs until cleanup
//! ```
//!
//! # Design Decisions
//! - Collaborators are shared trait objects, never owned by a stream
//! - Streams deregister themselves during cleanup; the proxy only injects resets
//! - pool.rs hides the runtime so streams can be driven by any executor

pub mod active;
pub mod listener;
pub mod pool;

use std::sync::Arc;

use crate::observability::{NoopStatsSink, StatsSink};
use crate::upstream::{ClusterManager, RoutersWrapper, UpstreamTransport};

pub use active::ActiveStreams;
pub use listener::Proxy;
pub use pool::{Job, TokioWorkerPool, WorkerPool};

/// Collaborators every stream of a proxy borrows.
#[derive(Clone)]
pub struct ProxyDeps {
    pub routers: Arc<RoutersWrapper>,
    pub cluster_manager: Arc<dyn ClusterManager>,
    pub upstream: Arc<dyn UpstreamTransport>,
    pub stats: Arc<dyn StatsSink>,
    pub pool: Arc<dyn WorkerPool>,
    /// Set by [`with_stats`](Self::with_stats); otherwise the proxy picks
    /// the sink from its config.
    stats_configured: bool,
}

impl ProxyDeps {
    /// Deps whose stats sink is chosen from the proxy config.
    pub fn new(
        routers: Arc<RoutersWrapper>,
        cluster_manager: Arc<dyn ClusterManager>,
        upstream: Arc<dyn UpstreamTransport>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        Self {
            routers,
            cluster_manager,
            upstream,
            stats: Arc::new(NoopStatsSink),
            pool,
            stats_configured: false,
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self.stats_configured = true;
        self
    }
}

impl ProxyDeps {
    pub(crate) fn stats_configured(&self) -> bool {
        self.stats_configured
    }
}

impl std::fmt::Debug for ProxyDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDeps")
            .field("routers", &self.routers)
            .finish_non_exhaustive()
    }
}
