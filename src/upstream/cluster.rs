//! Cluster and host selection contract.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::stream::message::HeaderMap;
use crate::upstream::router::Route;

/// An upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Endpoint address (e.g., "10.0.0.7:8080").
    pub address: String,
    pub cluster: String,
}

impl Host {
    pub fn new(address: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            cluster: cluster.into(),
        }
    }
}

/// Point-in-time view of a cluster, held for the lifetime of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub name: String,
    pub host_count: usize,
}

/// Result of host selection.
#[derive(Debug, Clone)]
pub struct HostSelection {
    pub snapshot: Arc<ClusterSnapshot>,
    pub host: Arc<Host>,
}

pub trait ClusterManager: Send + Sync {
    /// Pick a host for `route`, or fail with `ProxyError::NoHealthyHost`.
    fn choose_host(&self, route: &Route, headers: &HeaderMap) -> Result<HostSelection, ProxyError>;
}
