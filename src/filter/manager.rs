//! Per-stream owner of the receiver and sender filter chains.

use std::sync::Arc;

use tracing::trace;

use crate::filter::chain::FilterChain;
use crate::filter::handler::{ReceiverFilterHandler, SenderFilterHandler};
use crate::filter::types::{
    ChainOutcome, ReceiverFilterPhase, SenderFilterPhase, StatusConverter, StreamReceiverFilter,
    StreamSenderFilter,
};
use crate::stream::message::{HeaderMap, IoBuffer};
use crate::stream::phase::Phase;
use crate::stream::shared::{StreamContext, StreamShared};

/// Registration surface used by filter factories.
pub trait FilterChainBuilder {
    fn add_stream_receiver_filter(
        &mut self,
        filter: Box<dyn StreamReceiverFilter>,
        phase: ReceiverFilterPhase,
    );

    fn add_stream_sender_filter(
        &mut self,
        filter: Box<dyn StreamSenderFilter>,
        phase: SenderFilterPhase,
    );
}

pub struct StreamFilterManager {
    shared: Arc<StreamShared>,
    receiver_filters: FilterChain<dyn StreamReceiverFilter, ReceiverFilterPhase>,
    sender_filters: FilterChain<dyn StreamSenderFilter, SenderFilterPhase>,
    /// Phase a receiver filter asked to re-enter; consumed by the stream.
    receiver_filters_again_phase: Option<Phase>,
}

impl StreamFilterManager {
    pub fn new(shared: Arc<StreamShared>) -> Self {
        Self {
            shared,
            receiver_filters: FilterChain::new(),
            sender_filters: FilterChain::new(),
            receiver_filters_again_phase: None,
        }
    }

    pub fn receiver_filter_count(&self) -> usize {
        self.receiver_filters.len()
    }

    pub fn sender_filter_count(&self) -> usize {
        self.sender_filters.len()
    }

    /// Run the receiver filters registered at `phase`.
    ///
    /// A `ResumeAt` outcome is also recorded as the again-phase until the
    /// stream takes it.
    pub fn run_receiver_filter(
        &mut self,
        ctx: &StreamContext,
        phase: ReceiverFilterPhase,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
        converter: Option<&StatusConverter>,
    ) -> ChainOutcome {
        self.run_receiver_filter_from(ctx, phase, 0, headers, data, trailers, converter)
    }

    /// Like [`run_receiver_filter`](Self::run_receiver_filter), skipping chain
    /// entries before `start`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_receiver_filter_from(
        &mut self,
        ctx: &StreamContext,
        phase: ReceiverFilterPhase,
        start: usize,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
        converter: Option<&StatusConverter>,
    ) -> ChainOutcome {
        self.shared.set_filter_phase(Some(phase));
        let outcome = self.receiver_filters.run(phase, start, converter, |index, filter| {
            trace!(
                stream_id = %ctx.stream_id,
                filter_index = index,
                phase = ?phase,
                "Receiver filter"
            );
            filter.on_receive(ctx, headers, data, trailers)
        });
        self.shared.set_filter_phase(None);

        if let ChainOutcome::ResumeAt(target) = outcome {
            self.receiver_filters_again_phase = Some(target);
        }
        outcome
    }

    /// Run the sender filters for `phase`.
    ///
    /// Replacements made through a [`SenderFilterHandler`] are applied to the
    /// working parts before and after each filter runs, so a filter that
    /// stopped and set them later still hands them on.
    pub fn run_sender_filter(
        &mut self,
        ctx: &StreamContext,
        phase: SenderFilterPhase,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
        converter: Option<&StatusConverter>,
    ) -> ChainOutcome {
        self.run_sender_filter_from(ctx, phase, 0, headers, data, trailers, converter)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run_sender_filter_from(
        &mut self,
        ctx: &StreamContext,
        phase: SenderFilterPhase,
        start: usize,
        headers: &mut HeaderMap,
        data: &mut IoBuffer,
        trailers: &mut HeaderMap,
        converter: Option<&StatusConverter>,
    ) -> ChainOutcome {
        let shared = &self.shared;
        let outcome = self.sender_filters.run(phase, start, converter, |index, filter| {
            trace!(stream_id = %ctx.stream_id, filter_index = index, "Sender filter");
            shared.apply_response_overrides(headers, data, trailers);
            let status = filter.append(ctx, headers, data, trailers);
            shared.apply_response_overrides(headers, data, trailers);
            status
        });
        // Sender filters cannot jump phases; a resume request there completes the pass.
        match outcome {
            ChainOutcome::ResumeAt(_) => ChainOutcome::Completed,
            other => other,
        }
    }

    /// Pending resume target, if a receiver filter asked for one.
    pub fn receiver_filters_again_phase(&self) -> Option<Phase> {
        self.receiver_filters_again_phase
    }

    /// Consume the pending resume target.
    pub fn take_receiver_filters_again_phase(&mut self) -> Option<Phase> {
        self.receiver_filters_again_phase.take()
    }

    /// Notify every filter that the stream is gone.
    pub fn on_destroy(&mut self) {
        self.receiver_filters.for_each_mut(|f| f.on_destroy());
        self.sender_filters.for_each_mut(|f| f.on_destroy());
    }
}

impl FilterChainBuilder for StreamFilterManager {
    fn add_stream_receiver_filter(
        &mut self,
        mut filter: Box<dyn StreamReceiverFilter>,
        phase: ReceiverFilterPhase,
    ) {
        let index = self.receiver_filters.len();
        filter.set_receive_filter_handler(ReceiverFilterHandler::new(self.shared.clone(), index));
        self.receiver_filters.push(filter, phase);
    }

    fn add_stream_sender_filter(
        &mut self,
        mut filter: Box<dyn StreamSenderFilter>,
        phase: SenderFilterPhase,
    ) {
        let index = self.sender_filters.len();
        filter.set_sender_filter_handler(SenderFilterHandler::new(self.shared.clone(), index));
        self.sender_filters.push(filter, phase);
    }
}
