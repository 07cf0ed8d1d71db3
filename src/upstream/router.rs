//! Route lookup contract.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::stream::message::HeaderMap;

/// Routing output consumed by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Route identifier for logging/stats.
    pub name: String,
    /// Cluster the request is forwarded to.
    pub cluster: String,
}

impl Route {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }
}

/// A compiled routing table.
pub trait Routers: Send + Sync {
    /// Return the route for these headers, or `None` when nothing matches.
    fn match_route(&self, headers: &HeaderMap) -> Option<Arc<Route>>;
}

/// Holder for the current routing table of a proxy.
///
/// Readers never block; a reload swaps the whole table.
#[derive(Default)]
pub struct RoutersWrapper {
    current: ArcSwapOption<Box<dyn Routers>>,
}

impl RoutersWrapper {
    pub fn new(routers: Box<dyn Routers>) -> Self {
        let wrapper = Self::default();
        wrapper.update(routers);
        wrapper
    }

    /// Replace the routing table.
    pub fn update(&self, routers: Box<dyn Routers>) {
        self.current.store(Some(Arc::new(routers)));
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }

    /// Look up a route in the current table. No table means no route.
    pub fn match_route(&self, headers: &HeaderMap) -> Option<Arc<Route>> {
        let table = self.current.load_full()?;
        table.match_route(headers)
    }
}

impl std::fmt::Debug for RoutersWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutersWrapper")
            .field("configured", &self.is_configured())
            .finish()
    }
}
