//! Downstream stream subsystem.
//!
//! # Data Flow
//! ```text
//! connection layer ── on_receive ──► DownstreamStream (downstream.rs)
//!   DownFilter → MatchRoute → DownFilterAfterRoute → ChooseHost
//!     → DownFilterAfterChooseHost → DownRecvHeader ──► UpstreamTransport
//!   WaitNotify ◄── UpstreamResponseHandle
//!     → UpFilter → UpRecvHeader ──► ResponseSender
//!   any phase ── Terminate / failure / reset ──► cleanup (exactly once)
//! ```
//!
//! # Design Decisions
//! - Phases of one stream never overlap; each runs as one worker pool job
//! - State touched from other threads lives in shared.rs, atomics or short locks only
//! - Request and response parts are plain values owned by the stream

pub mod downstream;
pub mod message;
pub mod phase;
pub mod shared;

pub use downstream::{DownstreamStream, StreamSettings, UpstreamResponseHandle};
pub use message::{HeaderMap, IoBuffer, Message, RequestInfo, STATUS_HEADER};
pub use phase::{Phase, StreamId};
pub use shared::{StreamContext, StreamShared, StreamStatus};
