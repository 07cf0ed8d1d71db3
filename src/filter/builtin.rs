//! Filters available by name in config.
//!
//! - `set_header`: writes fixed request headers at its receiver phase
//! - `direct_response`: answers with a fixed status instead of forwarding
//! - `response_header`: writes fixed response headers before sending

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::schema::FilterConfig;
use crate::error::ProxyError;
use crate::filter::handler::{ReceiverFilterHandler, SenderFilterHandler};
use crate::filter::manager::FilterChainBuilder;
use crate::filter::registry::StreamFilterFactory;
use crate::filter::types::{
    ReceiverFilterPhase, SenderFilterPhase, StreamFilterStatus, StreamReceiverFilter,
    StreamSenderFilter,
};
use crate::stream::message::{HeaderMap, IoBuffer};
use crate::stream::shared::StreamContext;

pub const SET_HEADER: &str = "set_header";
pub const DIRECT_RESPONSE: &str = "direct_response";
pub const RESPONSE_HEADER: &str = "response_header";

fn parse<T: DeserializeOwned>(config: &FilterConfig) -> Result<T, ProxyError> {
    let value = if config.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        config.config.clone()
    };
    serde_json::from_value(value).map_err(|e| ProxyError::FilterConfig {
        name: config.name.clone(),
        message: e.to_string(),
    })
}

fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

// --- set_header ---

#[derive(Debug, Deserialize)]
struct HeadersConfig {
    headers: BTreeMap<String, String>,
}

struct SetHeaderFactory {
    headers: Arc<HeaderMap>,
    phase: ReceiverFilterPhase,
}

pub fn set_header_factory(
    config: &FilterConfig,
) -> Result<Arc<dyn StreamFilterFactory>, ProxyError> {
    let parsed: HeadersConfig = parse(config)?;
    Ok(Arc::new(SetHeaderFactory {
        headers: Arc::new(to_header_map(&parsed.headers)),
        phase: config.phase.unwrap_or_default(),
    }))
}

impl StreamFilterFactory for SetHeaderFactory {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainBuilder) {
        callbacks.add_stream_receiver_filter(
            Box::new(SetHeaderFilter {
                headers: self.headers.clone(),
            }),
            self.phase,
        );
    }
}

struct SetHeaderFilter {
    headers: Arc<HeaderMap>,
}

impl StreamReceiverFilter for SetHeaderFilter {
    fn on_receive(
        &mut self,
        _ctx: &StreamContext,
        headers: &mut HeaderMap,
        _data: &mut IoBuffer,
        _trailers: &mut HeaderMap,
    ) -> StreamFilterStatus {
        for (name, value) in self.headers.iter() {
            headers.set(name, value);
        }
        StreamFilterStatus::Continue
    }

    fn set_receive_filter_handler(&mut self, _handler: ReceiverFilterHandler) {}
}

// --- direct_response ---

#[derive(Debug, Deserialize)]
struct DirectResponseConfig {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

struct DirectResponseFactory {
    status: u16,
    headers: Arc<HeaderMap>,
    phase: ReceiverFilterPhase,
}

pub fn direct_response_factory(
    config: &FilterConfig,
) -> Result<Arc<dyn StreamFilterFactory>, ProxyError> {
    let parsed: DirectResponseConfig = parse(config)?;
    if !(100..=599).contains(&parsed.status) {
        return Err(ProxyError::FilterConfig {
            name: config.name.clone(),
            message: format!("status {} out of range", parsed.status),
        });
    }
    Ok(Arc::new(DirectResponseFactory {
        status: parsed.status,
        headers: Arc::new(to_header_map(&parsed.headers)),
        phase: config.phase.unwrap_or_default(),
    }))
}

impl StreamFilterFactory for DirectResponseFactory {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainBuilder) {
        callbacks.add_stream_receiver_filter(
            Box::new(DirectResponseFilter {
                status: self.status,
                headers: self.headers.clone(),
                handler: None,
            }),
            self.phase,
        );
    }
}

struct DirectResponseFilter {
    status: u16,
    headers: Arc<HeaderMap>,
    handler: Option<ReceiverFilterHandler>,
}

impl StreamReceiverFilter for DirectResponseFilter {
    fn on_receive(
        &mut self,
        _ctx: &StreamContext,
        _headers: &mut HeaderMap,
        _data: &mut IoBuffer,
        _trailers: &mut HeaderMap,
    ) -> StreamFilterStatus {
        match &self.handler {
            Some(handler) => {
                handler.send_hijack_reply(self.status, (*self.headers).clone());
                StreamFilterStatus::Stop
            }
            None => StreamFilterStatus::Terminate,
        }
    }

    fn set_receive_filter_handler(&mut self, handler: ReceiverFilterHandler) {
        self.handler = Some(handler);
    }
}

// --- response_header ---

struct ResponseHeaderFactory {
    headers: Arc<HeaderMap>,
}

pub fn response_header_factory(
    config: &FilterConfig,
) -> Result<Arc<dyn StreamFilterFactory>, ProxyError> {
    let parsed: HeadersConfig = parse(config)?;
    Ok(Arc::new(ResponseHeaderFactory {
        headers: Arc::new(to_header_map(&parsed.headers)),
    }))
}

impl StreamFilterFactory for ResponseHeaderFactory {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainBuilder) {
        callbacks.add_stream_sender_filter(
            Box::new(ResponseHeaderFilter {
                headers: self.headers.clone(),
            }),
            SenderFilterPhase::BeforeSend,
        );
    }
}

struct ResponseHeaderFilter {
    headers: Arc<HeaderMap>,
}

impl StreamSenderFilter for ResponseHeaderFilter {
    fn append(
        &mut self,
        _ctx: &StreamContext,
        headers: &mut HeaderMap,
        _data: &mut IoBuffer,
        _trailers: &mut HeaderMap,
    ) -> StreamFilterStatus {
        for (name, value) in self.headers.iter() {
            headers.set(name, value);
        }
        StreamFilterStatus::Continue
    }

    fn set_sender_filter_handler(&mut self, _handler: SenderFilterHandler) {}
}
