//! Request/response artifacts carried by a stream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use uuid::Uuid;

/// Body buffer handed to filters.
pub type IoBuffer = BytesMut;

/// Header name used to carry a synthesized status code.
pub const STATUS_HEADER: &str = "x-proxy-status";

/// Protocol-neutral header (and trailer) map.
///
/// Names are normalized to lowercase; the codec that built the map owns the
/// wire casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Insert or replace a header, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(name.into().to_ascii_lowercase(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Headers, body and trailers of one direction of a stream.
///
/// Any part may be absent: a header-only request has no data, a response
/// synthesized by a filter may have no trailers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub headers: Option<HeaderMap>,
    pub data: Option<IoBuffer>,
    pub trailers: Option<HeaderMap>,
}

impl Message {
    pub fn new(
        headers: Option<HeaderMap>,
        data: Option<IoBuffer>,
        trailers: Option<HeaderMap>,
    ) -> Self {
        Self {
            headers,
            data,
            trailers,
        }
    }

    /// Mutable access to every part, creating empty ones where absent.
    pub fn parts_mut(&mut self) -> (&mut HeaderMap, &mut IoBuffer, &mut HeaderMap) {
        (
            self.headers.get_or_insert_with(HeaderMap::new),
            self.data.get_or_insert_with(IoBuffer::new),
            self.trailers.get_or_insert_with(HeaderMap::new),
        )
    }

    /// Status code carried in the headers, if any.
    pub fn status_code(&self) -> Option<u16> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(STATUS_HEADER))
            .and_then(|v| v.parse().ok())
    }
}

/// Per-stream bookkeeping exposed to filters and stats.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Unique request identifier (UUID v4).
    pub request_id: Uuid,
    pub start_time: Instant,
    /// Name of the route chosen at `MatchRoute`.
    pub route_name: Option<String>,
    /// Address of the host chosen at `ChooseHost`.
    pub upstream_host: Option<String>,
    /// Status code of the response sent downstream.
    pub response_code: Option<u16>,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            start_time: Instant::now(),
            route_name: None,
            upstream_host: None,
            response_code: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self::new()
    }
}
