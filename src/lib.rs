//! Layer-7 proxy downstream stream core.
//!
//! A [`Proxy`] turns each inbound request into a [`DownstreamStream`] that
//! runs receiver filters around routing and host selection, forwards the
//! request upstream, runs sender filters on the response and writes it back.

pub mod config;
pub mod error;
pub mod filter;
pub mod observability;
pub mod proxy;
pub mod stream;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, TerminateReason};
pub use filter::{
    ChainOutcome, ReceiverFilterHandler, ReceiverFilterPhase, SenderFilterHandler,
    SenderFilterPhase, StreamFilterStatus, StreamReceiverFilter, StreamSenderFilter,
};
pub use proxy::{Proxy, ProxyDeps, TokioWorkerPool, WorkerPool};
pub use stream::{DownstreamStream, HeaderMap, IoBuffer, Message, Phase, StreamId, StreamStatus};
