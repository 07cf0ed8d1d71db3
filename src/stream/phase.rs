//! Stream identity and transaction phases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for stream IDs. Only uniqueness matters, so relaxed ordering is enough.
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a downstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Generate a new unique stream ID.
    pub fn next() -> Self {
        Self(STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for StreamId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Transaction phases, in the order a stream advances through them.
///
/// `MatchRoute` and `ChooseHost` double as the targets a receiver filter can
/// ask to jump back to.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Init = 0,
    /// Receiver filters registered at `BeforeRoute`.
    DownFilter = 1,
    MatchRoute = 2,
    /// Receiver filters registered at `AfterRoute`.
    DownFilterAfterRoute = 3,
    ChooseHost = 4,
    /// Receiver filters registered at `AfterChooseHost`.
    DownFilterAfterChooseHost = 5,
    /// Forward the request to the upstream transport.
    DownRecvHeader = 6,
    /// Waiting for the upstream response.
    WaitNotify = 7,
    /// Sender filters.
    UpFilter = 8,
    /// Write the response downstream.
    UpRecvHeader = 9,
    End = 10,
}

impl Phase {
    /// The phase that follows this one on the normal forward path.
    pub fn next(self) -> Phase {
        match self {
            Phase::Init => Phase::DownFilter,
            Phase::DownFilter => Phase::MatchRoute,
            Phase::MatchRoute => Phase::DownFilterAfterRoute,
            Phase::DownFilterAfterRoute => Phase::ChooseHost,
            Phase::ChooseHost => Phase::DownFilterAfterChooseHost,
            Phase::DownFilterAfterChooseHost => Phase::DownRecvHeader,
            Phase::DownRecvHeader => Phase::WaitNotify,
            Phase::WaitNotify => Phase::UpFilter,
            Phase::UpFilter => Phase::UpRecvHeader,
            Phase::UpRecvHeader | Phase::End => Phase::End,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::DownFilter => "down_filter",
            Phase::MatchRoute => "match_route",
            Phase::DownFilterAfterRoute => "down_filter_after_route",
            Phase::ChooseHost => "choose_host",
            Phase::DownFilterAfterChooseHost => "down_filter_after_choose_host",
            Phase::DownRecvHeader => "down_recv_header",
            Phase::WaitNotify => "wait_notify",
            Phase::UpFilter => "up_filter",
            Phase::UpRecvHeader => "up_recv_header",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
