//! Handles through which filters reach back into their stream.
//!
//! Handlers only touch [`StreamShared`]; anything that has to advance the
//! stream is scheduled as a new work item, so calling a handler from inside a
//! filter callback never blocks on the phase that is running it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TerminateReason;
use crate::filter::types::ReceiverFilterPhase;
use crate::stream::message::{HeaderMap, IoBuffer, RequestInfo};
use crate::stream::phase::StreamId;
use crate::stream::shared::StreamShared;
use crate::upstream::Route;

/// Chain a handler's filter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterSide {
    Receiver,
    Sender,
}

/// Handler given to receiver filters.
#[derive(Debug, Clone)]
pub struct ReceiverFilterHandler {
    shared: Arc<StreamShared>,
    /// Position of the owning filter in the receiver chain.
    index: usize,
}

impl ReceiverFilterHandler {
    pub(crate) fn new(shared: Arc<StreamShared>, index: usize) -> Self {
        Self { shared, index }
    }

    pub fn stream_id(&self) -> StreamId {
        self.shared.id()
    }

    /// Receiver phase the chain is executing right now.
    pub fn current_phase(&self) -> Option<ReceiverFilterPhase> {
        self.shared.filter_phase()
    }

    /// Route chosen at `MatchRoute`, if routing already ran.
    pub fn route(&self) -> Option<Arc<Route>> {
        self.shared.route()
    }

    pub fn request_info(&self) -> RequestInfo {
        self.shared.request_info()
    }

    /// Answer the request directly, skipping upstream forwarding.
    ///
    /// Usually paired with returning `Stop`. Called later from another thread
    /// it also resumes a paused stream. Ignored once the response is already
    /// in the sender filters.
    pub fn send_hijack_reply(&self, code: u16, headers: HeaderMap) {
        if !self.shared.set_hijack(code, headers) {
            warn!(
                stream_id = %self.shared.id(),
                code,
                "Hijack reply after the response reached the sender filters, ignoring"
            );
            return;
        }
        if let Some(stream) = self.shared.stream() {
            stream.continue_processing();
        }
    }

    /// Resume a stream paused by this filter's `Stop`, starting at the next filter.
    ///
    /// Ignored when the stream is not paused on this filter.
    pub fn continue_receiving(&self) {
        match self.shared.stream() {
            Some(stream) => stream.continue_from_filter(FilterSide::Receiver, self.index),
            None => debug!(
                stream_id = %self.shared.id(),
                "continue_receiving on a detached stream"
            ),
        }
    }

    /// Abort the transaction.
    pub fn terminate(&self) {
        if let Some(stream) = self.shared.stream() {
            stream.terminate(TerminateReason::FilterTerminated);
        } else if self.shared.try_mark_cleaned() {
            self.shared.clear();
        }
    }
}

/// Handler given to sender filters.
#[derive(Debug, Clone)]
pub struct SenderFilterHandler {
    shared: Arc<StreamShared>,
    index: usize,
}

impl SenderFilterHandler {
    pub(crate) fn new(shared: Arc<StreamShared>, index: usize) -> Self {
        Self { shared, index }
    }

    pub fn stream_id(&self) -> StreamId {
        self.shared.id()
    }

    pub fn route(&self) -> Option<Arc<Route>> {
        self.shared.route()
    }

    pub fn request_info(&self) -> RequestInfo {
        self.shared.request_info()
    }

    /// Replace the response headers seen by later filters and the final write.
    pub fn set_response_headers(&self, headers: HeaderMap) {
        self.shared.set_response_headers(headers);
    }

    pub fn set_response_data(&self, data: IoBuffer) {
        self.shared.set_response_data(data);
    }

    pub fn set_response_trailers(&self, trailers: HeaderMap) {
        self.shared.set_response_trailers(trailers);
    }

    /// Resume a stream paused by this filter's `Stop`.
    ///
    /// Replacements set before this call are applied before the next filter
    /// runs, or before the final write when this filter was the last one.
    pub fn continue_sending(&self) {
        if let Some(stream) = self.shared.stream() {
            stream.continue_from_filter(FilterSide::Sender, self.index);
        }
    }

    pub fn terminate(&self) {
        if let Some(stream) = self.shared.stream() {
            stream.terminate(TerminateReason::FilterTerminated);
        } else if self.shared.try_mark_cleaned() {
            self.shared.clear();
        }
    }
}
