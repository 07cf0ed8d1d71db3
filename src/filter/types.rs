//! Filter statuses, phases and capability traits.

use serde::{Deserialize, Serialize};

use crate::error::TerminateReason;
use crate::filter::handler::{ReceiverFilterHandler, SenderFilterHandler};
use crate::stream::message::{HeaderMap, IoBuffer};
use crate::stream::phase::Phase;
use crate::stream::shared::StreamContext;

/// Point in the request path at which a receiver filter runs.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverFilterPhase {
    #[default]
    BeforeRoute = 1,
    AfterRoute = 2,
    AfterChooseHost = 3,
}

impl ReceiverFilterPhase {
    /// The transaction phase that executes filters registered at this point.
    pub fn phase(&self) -> Phase {
        match self {
            ReceiverFilterPhase::BeforeRoute => Phase::DownFilter,
            ReceiverFilterPhase::AfterRoute => Phase::DownFilterAfterRoute,
            ReceiverFilterPhase::AfterChooseHost => Phase::DownFilterAfterChooseHost,
        }
    }

    pub(crate) fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(ReceiverFilterPhase::BeforeRoute),
            2 => Some(ReceiverFilterPhase::AfterRoute),
            3 => Some(ReceiverFilterPhase::AfterChooseHost),
            _ => None,
        }
    }
}

/// Send stage at which a sender filter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderFilterPhase {
    #[default]
    BeforeSend,
}

/// Result of invoking a single filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFilterStatus {
    /// Proceed to the next filter.
    Continue,
    /// Halt the chain. The stream waits for an out-of-band completion,
    /// typically a hijack reply or an explicit resume.
    Stop,
    /// Halt and re-enter `MatchRoute`.
    ReMatchRoute,
    /// Halt and re-enter `ChooseHost`.
    ReChooseHost,
    /// Abort the whole transaction.
    Terminate,
}

impl StreamFilterStatus {
    /// Transaction phase this status asks to jump back to.
    pub fn resume_phase(&self) -> Option<Phase> {
        match self {
            StreamFilterStatus::ReMatchRoute => Some(Phase::MatchRoute),
            StreamFilterStatus::ReChooseHost => Some(Phase::ChooseHost),
            _ => None,
        }
    }
}

/// Call-site policy remapping the status a filter returned before the chain acts on it.
///
/// Resume requests are recorded from the filter's own status, so a policy that
/// downgrades them to `Continue` changes iteration but not the recorded target.
pub type StatusConverter = dyn Fn(StreamFilterStatus) -> StreamFilterStatus + Send + Sync;

/// Policy that keeps iterating past resume requests.
pub fn convert_resume_to_continue(status: StreamFilterStatus) -> StreamFilterStatus {
    match status {
        StreamFilterStatus::ReMatchRoute | StreamFilterStatus::ReChooseHost => {
            StreamFilterStatus::Continue
        }
        other => other,
    }
}

/// How a chain pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every filter of the phase returned `Continue`.
    Completed,
    /// The filter at `index` returned `Stop`.
    Stopped { index: usize },
    /// A filter asked to re-enter `phase`.
    ResumeAt(Phase),
    /// The chain aborted; the stream must be cleaned up.
    Terminated(ChainAbort),
}

impl ChainOutcome {
    pub fn is_halted(&self) -> bool {
        !matches!(self, ChainOutcome::Completed)
    }
}

/// Cause of a terminated chain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAbort {
    /// The filter at `index` returned `Terminate`.
    Status { index: usize },
    /// The filter at `index` panicked.
    Panic { index: usize, message: String },
}

impl ChainAbort {
    pub fn reason(&self) -> TerminateReason {
        match self {
            ChainAbort::Status { .. } => TerminateReason::FilterTerminated,
            ChainAbort::Panic { .. } => TerminateReason::FilterPanic,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ChainAbort::Status { index } | ChainAbort::Panic { index, .. } => *index,
        }
    }
}

/// Filter that inspects or rewrites the request on its way upstream.
pub trait StreamReceiverFilter: Send {
    fn on_receive(
        &mut self,
        ctx: &StreamContext,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
    ) -> StreamFilterStatus;

    /// Called once at registration with the handler bound to the owning stream.
    fn set_receive_filter_handler(&mut self, handler: ReceiverFilterHandler);

    fn on_destroy(&mut self) {}
}

/// Filter that inspects or rewrites the response on its way downstream.
pub trait StreamSenderFilter: Send {
    fn append(
        &mut self,
        ctx: &StreamContext,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
    ) -> StreamFilterStatus;

    /// Called once at registration with the handler bound to the owning stream.
    fn set_sender_filter_handler(&mut self, handler: SenderFilterHandler);

    fn on_destroy(&mut self) {}
}
