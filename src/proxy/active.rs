//! Registry of streams that have not been cleaned up yet.

use std::sync::Arc;

use dashmap::DashMap;

use crate::stream::downstream::DownstreamStream;
use crate::stream::phase::StreamId;

#[derive(Debug, Default)]
pub struct ActiveStreams {
    streams: DashMap<StreamId, Arc<DownstreamStream>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stream: Arc<DownstreamStream>) {
        self.streams.insert(stream.id(), stream);
    }

    pub fn remove(&self, id: StreamId) -> Option<Arc<DownstreamStream>> {
        self.streams.remove(&id).map(|(_, stream)| stream)
    }

    pub fn get(&self, id: StreamId) -> Option<Arc<DownstreamStream>> {
        self.streams.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Streams active right now. Collected first so callers can terminate
    /// them without holding a shard lock.
    pub fn snapshot(&self) -> Vec<Arc<DownstreamStream>> {
        self.streams.iter().map(|entry| entry.value().clone()).collect()
    }
}
