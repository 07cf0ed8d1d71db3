//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! DownstreamStream (phase advance, termination, cleanup)
//!     → StatsSink::record(StatsEvent)
//!     → metrics.rs (MetricsStatsSink → `metrics` facade counters)
//!     → whichever recorder the embedding binary installed
//! ```
//!
//! # Design Decisions
//! - The sink is injected per proxy, never global, so tests can count events
//! - Recording is fire-and-forget and never blocks a filter chain
//! - Structured logs go through `tracing`; installing a subscriber is left to the binary

pub mod metrics;

pub use self::metrics::{sink_for, MetricsStatsSink, NoopStatsSink, StatsEvent, StatsSink};
