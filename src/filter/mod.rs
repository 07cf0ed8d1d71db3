//! Stream filter subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig.stream_filters
//!     → registry.rs (name → StreamFilterFactory, builtin.rs filters)
//!     → manager.rs (per-stream StreamFilterManager, filters registered with handlers)
//!     → chain.rs (walk one phase, interpret statuses)
//!     → ChainOutcome → DownstreamStream
//! ```
//!
//! # Design Decisions
//! - Receiver and sender chains share one generic walker
//! - A chain pass returns an explicit outcome; the stream never inspects filters
//! - Filter panics are contained in the walker and reported as termination

pub mod builtin;
pub mod chain;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod types;

pub use chain::FilterChain;
pub use handler::{ReceiverFilterHandler, SenderFilterHandler};
pub use manager::{FilterChainBuilder, StreamFilterManager};
pub use registry::{FilterConstructor, FilterRegistry, StreamFilterFactory};
pub use types::{
    convert_resume_to_continue, ChainAbort, ChainOutcome, ReceiverFilterPhase, SenderFilterPhase,
    StatusConverter, StreamFilterStatus, StreamReceiverFilter, StreamSenderFilter,
};
