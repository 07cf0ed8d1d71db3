//! Ordered, phase-tagged filter chain.
//!
//! # Responsibilities
//! - Keep filters in registration order, each tagged with the phase it runs at
//! - Walk the filters of one phase and interpret each returned status
//! - Contain filter panics so the chain always yields an outcome
//!
//! # Design Decisions
//! - One implementation shared by receiver and sender chains; the caller
//!   supplies the invoke closure that knows the concrete callback signature
//! - Indexes are positions in the whole chain, not within a phase, so a
//!   stopped pass can be resumed from the next entry

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::filter::types::{ChainAbort, ChainOutcome, StatusConverter, StreamFilterStatus};

struct ChainEntry<F: ?Sized, P> {
    filter: Box<F>,
    phase: P,
}

/// Filters of one direction in registration order.
pub struct FilterChain<F: ?Sized, P> {
    entries: Vec<ChainEntry<F, P>>,
}

impl<F: ?Sized, P: Copy + PartialEq + std::fmt::Debug> FilterChain<F, P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a filter bound to `phase`.
    pub fn push(&mut self, filter: Box<F>, phase: P) {
        self.entries.push(ChainEntry { filter, phase });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of filters registered at `phase`.
    pub fn count(&self, phase: P) -> usize {
        self.entries.iter().filter(|e| e.phase == phase).count()
    }

    /// Run every filter registered at `phase`, starting at chain index `start`.
    ///
    /// `invoke` calls the filter; `converter` optionally remaps its status
    /// before the chain acts on it.
    pub fn run<I>(
        &mut self,
        phase: P,
        start: usize,
        converter: Option<&StatusConverter>,
        mut invoke: I,
    ) -> ChainOutcome
    where
        I: FnMut(usize, &mut F) -> StreamFilterStatus,
    {
        let mut pending_resume = None;

        for (index, entry) in self.entries.iter_mut().enumerate().skip(start) {
            if entry.phase != phase {
                continue;
            }

            let filter = &mut *entry.filter;
            let raw = match panic::catch_unwind(AssertUnwindSafe(|| invoke(index, filter))) {
                Ok(status) => status,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        filter_index = index,
                        phase = ?phase,
                        panic = %message,
                        "Stream filter panicked"
                    );
                    return ChainOutcome::Terminated(ChainAbort::Panic { index, message });
                }
            };

            let status = converter.map_or(raw, |convert| convert(raw));
            if let Some(target) = status.resume_phase().or(raw.resume_phase()) {
                pending_resume = Some(target);
            }

            match status {
                StreamFilterStatus::Continue => {}
                StreamFilterStatus::Stop => {
                    debug!(filter_index = index, phase = ?phase, "Filter chain stopped");
                    return ChainOutcome::Stopped { index };
                }
                StreamFilterStatus::ReMatchRoute | StreamFilterStatus::ReChooseHost => {
                    if let Some(target) = status.resume_phase() {
                        debug!(
                            filter_index = index,
                            target = %target,
                            "Filter requested phase jump"
                        );
                        return ChainOutcome::ResumeAt(target);
                    }
                }
                StreamFilterStatus::Terminate => {
                    debug!(filter_index = index, phase = ?phase, "Filter chain terminated");
                    return ChainOutcome::Terminated(ChainAbort::Status { index });
                }
            }
        }

        match pending_resume {
            Some(target) => ChainOutcome::ResumeAt(target),
            None => ChainOutcome::Completed,
        }
    }

    /// Visit every filter, e.g. for teardown.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut F)) {
        for entry in &mut self.entries {
            f(&mut entry.filter);
        }
    }
}

impl<F: ?Sized, P: Copy + PartialEq + std::fmt::Debug> Default for FilterChain<F, P> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
