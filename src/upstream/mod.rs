//! Collaborators consulted by a stream between filter phases.
//!
//! # Data Flow
//! ```text
//! MatchRoute:  request headers → router.rs (Routers) → Route | no route
//! ChooseHost:  Route           → cluster.rs (ClusterManager) → snapshot + Host | no host
//! Forward:     request         → transport.rs (UpstreamTransport) → response | failure
//! Respond:     response        → transport.rs (ResponseSender) → written | write error
//! ```
//!
//! # Design Decisions
//! - Only the contract the stream relies on lives here; codecs, route
//!   matching and load balancing belong to the implementations
//! - Router table is swapped atomically, streams read a snapshot per lookup
//! - Upstream responses arrive through a handle that holds the stream weakly

pub mod cluster;
pub mod router;
pub mod transport;

pub use cluster::{ClusterManager, ClusterSnapshot, Host, HostSelection};
pub use router::{Route, Routers, RoutersWrapper};
pub use transport::{ResponseSender, UpstreamTransport};
