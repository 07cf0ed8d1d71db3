//! Upstream forwarding and downstream response contracts.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::stream::downstream::UpstreamResponseHandle;
use crate::stream::message::Message;
use crate::stream::phase::StreamId;
use crate::upstream::cluster::Host;

pub trait UpstreamTransport: Send + Sync {
    /// Send `request` to `host`.
    ///
    /// Must eventually call exactly one of `on_response` / `on_failure` on the
    /// handle, from any thread. Dropping the handle without calling either
    /// leaves the stream waiting until it is reset.
    fn forward(&self, host: Arc<Host>, request: Message, handle: UpstreamResponseHandle);
}

pub trait ResponseSender: Send + Sync {
    /// Write the final response to the client.
    fn send_response(&self, stream_id: StreamId, response: Message) -> Result<(), ProxyError>;
}
