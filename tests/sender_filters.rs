//! Sender chain behavior.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use stream_proxy::error::TerminateReason;
use stream_proxy::filter::ChainOutcome;
use stream_proxy::observability::StatsEvent;
use stream_proxy::stream::{HeaderMap, IoBuffer};
use stream_proxy::{
    ReceiverFilterPhase, SenderFilterHandler, SenderFilterPhase, StreamFilterStatus,
    StreamSenderFilter,
};

use SenderFilterPhase::BeforeSend;
use StreamFilterStatus::{Continue, Stop, Terminate};

#[tokio::test(flavor = "multi_thread")]
async fn stop_skips_later_sender_filters_and_populates_response() {
    let h = harness().build();
    let stream = h.new_stream();
    let (first, first_tracker) = sender(Continue);
    let (second, second_tracker) = sender(Stop);
    let (third, third_tracker) = sender(Continue);
    stream.add_stream_sender_filter(first, BeforeSend);
    stream.add_stream_sender_filter(second, BeforeSend);
    stream.add_stream_sender_filter(third, BeforeSend);

    let outcome = stream.run_sender_filter(BeforeSend, None, None, None, None);

    assert_eq!(outcome, ChainOutcome::Stopped { index: 1 });
    assert_eq!(first_tracker.calls(), 1);
    assert_eq!(second_tracker.calls(), 1);
    assert_eq!(third_tracker.calls(), 0);

    let response = stream.response();
    assert!(response.headers.is_some());
    assert!(response.data.is_some());
    assert!(response.trailers.is_some());
    assert!(!stream.is_cleaned());
}

#[tokio::test(flavor = "multi_thread")]
async fn terminate_from_direct_run_cleans_up() {
    let h = harness().build();
    let stream = h.new_stream();
    let (first, _) = sender(Terminate);
    let (second, second_tracker) = sender(Continue);
    stream.add_stream_sender_filter(first, BeforeSend);
    stream.add_stream_sender_filter(second, BeforeSend);

    let outcome = stream.run_sender_filter(BeforeSend, Some(HeaderMap::new()), None, None, None);

    assert!(outcome.is_halted());
    assert_eq!(second_tracker.calls(), 0);
    assert!(stream.is_cleaned());
    assert_eq!(finished(&stream).await, TerminateReason::FilterTerminated);
    assert_eq!(h.proxy.active_streams(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sender_terminate_in_flow_skips_the_downstream_write() {
    let h = harness().build();
    let stream = h.new_stream();
    let (filter, _) = sender(Terminate);
    stream.add_stream_sender_filter(filter, BeforeSend);

    start(&stream, "web");
    assert_eq!(finished(&stream).await, TerminateReason::FilterTerminated);

    assert_eq!(h.upstream.forwarded().len(), 1);
    assert!(h.sender.sent().is_empty());
    assert_eq!(h.stats.count(StatsEvent::StreamCleaned), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_replacements_reach_later_filters_and_the_write() {
    let h = harness().build();
    let stream = h.new_stream();
    let (rewrite, _) = scripted_sender(|handler, headers, _| {
        let mut replaced = headers.clone();
        replaced.set("server", "stream-proxy");
        handler.set_response_headers(replaced);
        handler.set_response_data(IoBuffer::from(&b"rewritten"[..]));
        Continue
    });
    let (check, check_tracker) = scripted_sender(|_, headers, data| {
        assert_eq!(headers.get("server"), Some("stream-proxy"));
        assert_eq!(&data[..], b"rewritten");
        Continue
    });
    stream.add_stream_sender_filter(rewrite, BeforeSend);
    stream.add_stream_sender_filter(check, BeforeSend);

    start(&stream, "web");
    assert_eq!(finished(&stream).await, TerminateReason::Completed);

    assert_eq!(check_tracker.calls(), 1);
    let sent = h.sender.sent();
    let response = &sent[0].1;
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.headers.as_ref().and_then(|h| h.get("server")), Some("stream-proxy"));
    assert_eq!(response.data.as_deref(), Some(&b"rewritten"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn sender_stop_pauses_until_continue_sending() {
    let h = harness().build();
    let stream = h.new_stream();
    let handler_slot = Arc::new(Mutex::new(None));
    let slot = handler_slot.clone();
    let (hold, _) = scripted_sender(move |handler, _, _| {
        *slot.lock().unwrap() = Some(handler.clone());
        Stop
    });
    let (after, after_tracker) = sender(Continue);
    stream.add_stream_sender_filter(hold, BeforeSend);
    stream.add_stream_sender_filter(after, BeforeSend);

    start(&stream, "web");
    paused(&stream).await;
    assert_eq!(after_tracker.calls(), 0);
    assert!(h.sender.sent().is_empty());

    let handler = handler_slot.lock().unwrap().clone().unwrap();
    assert_eq!(handler.request_info().upstream_host.as_deref(), Some("10.0.0.1:8080"));
    handler.continue_sending();

    assert_eq!(finished(&stream).await, TerminateReason::Completed);
    assert_eq!(after_tracker.calls(), 1);
    assert_eq!(h.sender.sent().len(), 1);
}

type HandlerSlot = Arc<Mutex<Option<SenderFilterHandler>>>;

/// Sender filter that parks its handler and stops the chain.
fn parking_sender() -> (Box<dyn StreamSenderFilter>, HandlerSlot) {
    let slot = Arc::new(Mutex::new(None));
    let parked = slot.clone();
    let (filter, _) = scripted_sender(move |handler, _, _| {
        *parked.lock().unwrap() = Some(handler.clone());
        Stop
    });
    (filter, slot)
}

#[tokio::test(flavor = "multi_thread")]
async fn replacement_set_after_stop_reaches_the_write() {
    let h = harness().build();
    let stream = h.new_stream();
    let (hold, slot) = parking_sender();
    stream.add_stream_sender_filter(hold, BeforeSend);

    start(&stream, "web");
    paused(&stream).await;

    let handler = slot.lock().unwrap().clone().unwrap();
    handler.set_response_data(IoBuffer::from(&b"async-body"[..]));
    handler.continue_sending();

    assert_eq!(finished(&stream).await, TerminateReason::Completed);
    let sent = h.sender.sent();
    assert_eq!(sent[0].1.data.as_deref(), Some(&b"async-body"[..]));
    assert_eq!(sent[0].1.status_code(), Some(200));
}

#[tokio::test(flavor = "multi_thread")]
async fn replacement_set_after_stop_is_seen_by_the_next_filter() {
    let h = harness().build();
    let stream = h.new_stream();
    let (hold, slot) = parking_sender();
    let (next, next_tracker) = scripted_sender(|_, headers, _| {
        assert_eq!(headers.get("via"), Some("async"));
        headers.set("x-next", "1");
        Continue
    });
    stream.add_stream_sender_filter(hold, BeforeSend);
    stream.add_stream_sender_filter(next, BeforeSend);

    start(&stream, "web");
    paused(&stream).await;

    let mut headers = stream.response().headers.unwrap_or_default();
    headers.set("via", "async");
    let handler = slot.lock().unwrap().clone().unwrap();
    handler.set_response_headers(headers);
    handler.continue_sending();

    assert_eq!(finished(&stream).await, TerminateReason::Completed);
    assert_eq!(next_tracker.calls(), 1);
    let sent = h.sender.sent();
    let written = sent[0].1.headers.as_ref().unwrap();
    assert_eq!(written.get("via"), Some("async"));
    assert_eq!(written.get("x-next"), Some("1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn continue_sending_from_another_filter_is_ignored() {
    let h = harness().build();
    let stream = h.new_stream();
    let first_slot = Arc::new(Mutex::new(None));
    let parked = first_slot.clone();
    let (first, _) = scripted_sender(move |handler, _, _| {
        *parked.lock().unwrap() = Some(handler.clone());
        Continue
    });
    let (hold, hold_slot) = parking_sender();
    stream.add_stream_sender_filter(first, BeforeSend);
    stream.add_stream_sender_filter(hold, BeforeSend);

    start(&stream, "web");
    paused(&stream).await;

    first_slot.lock().unwrap().clone().unwrap().continue_sending();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(h.sender.sent().is_empty());
    assert!(!stream.is_cleaned());

    hold_slot.lock().unwrap().clone().unwrap().continue_sending();
    assert_eq!(finished(&stream).await, TerminateReason::Completed);
    assert_eq!(h.sender.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn hijack_after_the_response_reached_sender_filters_is_dropped() {
    let h = harness().build();
    let stream = h.new_stream();
    let (gate, gate_tracker) = receiver(Continue);
    let (hold, slot) = parking_sender();
    stream.add_stream_receiver_filter(gate, ReceiverFilterPhase::BeforeRoute);
    stream.add_stream_sender_filter(hold, BeforeSend);

    start(&stream, "web");
    paused(&stream).await;

    gate_tracker.handler().send_hijack_reply(403, HeaderMap::new());
    slot.lock().unwrap().clone().unwrap().continue_sending();

    assert_eq!(finished(&stream).await, TerminateReason::Completed);
    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.status_code(), Some(200));
    assert_eq!(h.upstream.forwarded().len(), 1);
}
