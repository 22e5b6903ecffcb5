//! End-to-end coverage over a real channel pair: two transports, two
//! channel backends, two in-process ports — the full stack.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgport_channel::MessageChannel;
use msgport_port::InProcPort;
use msgport_transport::{
    ChannelBackend, Responder, Transport, TransportError, TransportEvent, EVENT_EVENT,
    REQUEST_EVENT,
};
use serde_json::{json, Value};

fn transport_pair(scope: &str) -> (Transport, Transport) {
    let (pa, pb) = InProcPort::pair("https://left", "https://right");
    let left = Transport::with_backend(ChannelBackend::new(MessageChannel::open(scope, pa)));
    let right = Transport::with_backend(ChannelBackend::new(MessageChannel::open(scope, pb)));
    (left, right)
}

#[test]
fn request_round_trip_doubles_payload() {
    let (server, client) = transport_pair("app");

    server.on(REQUEST_EVENT, |event| {
        let TransportEvent::Request(data, responder) = event else {
            return false;
        };
        let x = data["x"].as_i64().expect("request payload should carry x");
        responder.resolve(json!(x * 2));
        true
    });

    let handle = client
        .send_request(json!({"x": 21}))
        .expect("request should send");
    let result = handle
        .wait_timeout(Duration::from_secs(5))
        .expect("response should arrive");
    assert_eq!(result, json!(42));
}

#[test]
fn events_sent_before_confirmation_arrive_in_order() {
    let (pa, pb) = InProcPort::pair("a", "b");

    let sender = Transport::with_backend(ChannelBackend::new(MessageChannel::open("app", pa)));
    // The far side does not exist yet; these buffer inside the channel.
    for i in 0..5 {
        sender
            .send_event(json!({"seq": i}))
            .expect("event should buffer");
    }
    std::thread::sleep(Duration::from_millis(120));

    // Register the listener before wiring the backend so every event is
    // dispatched live, in arrival order.
    let receiver = Transport::new();
    let (tx, rx) = mpsc::channel();
    receiver.on(EVENT_EVENT, move |event| {
        tx.send(event.data().clone()).expect("test receiver should be alive");
        true
    });
    receiver.set_backend(ChannelBackend::new(MessageChannel::open("app", pb)));

    for i in 0..5 {
        let data = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("buffered event should arrive after confirmation");
        assert_eq!(data["seq"].as_i64(), Some(i), "flush must preserve order");
    }
}

#[test]
fn out_of_order_responses_resolve_matching_requests() {
    let (server, client) = transport_pair("app");

    // Hold the first request's responder and answer both in reverse
    // order once the second arrives.
    let held: Arc<Mutex<Vec<(Value, Responder)>>> = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&held);
    server.on(REQUEST_EVENT, move |event| {
        let TransportEvent::Request(data, responder) = event else {
            return false;
        };
        let mut held = slot.lock().expect("test lock");
        held.push((data.clone(), responder.clone()));
        if held.len() == 2 {
            for (data, responder) in held.drain(..).rev() {
                responder.resolve(json!(format!("echo:{}", data["tag"].as_str().expect("tag"))));
            }
        }
        true
    });

    let first = client
        .send_request(json!({"tag": "first"}))
        .expect("request should send");
    let second = client
        .send_request(json!({"tag": "second"}))
        .expect("request should send");
    assert!(second.id() > first.id(), "ids must be strictly increasing");

    assert_eq!(
        first.wait_timeout(Duration::from_secs(5)).expect("first response"),
        json!("echo:first")
    );
    assert_eq!(
        second.wait_timeout(Duration::from_secs(5)).expect("second response"),
        json!("echo:second")
    );
}

#[test]
fn error_response_rejects_the_request() {
    let (server, client) = transport_pair("app");

    server.on(REQUEST_EVENT, |event| {
        let TransportEvent::Request(_, responder) = event else {
            return false;
        };
        responder.reject(json!({"code": "denied"}));
        true
    });

    let handle = client.send_request(json!({})).expect("request should send");
    match handle.wait_timeout(Duration::from_secs(5)) {
        Err(TransportError::ErrorResponse(error)) => {
            assert_eq!(error, json!({"code": "denied"}));
        }
        other => panic!("expected ErrorResponse, got {other:?}"),
    }
}

#[test]
fn request_registered_after_arrival_is_still_answered() {
    let (server, client) = transport_pair("app");

    let handle = client
        .send_request(json!({"x": 4}))
        .expect("request should send");
    // Let the request arrive while no handler is registered; it is
    // backlogged by the server transport.
    std::thread::sleep(Duration::from_millis(300));

    server.on(REQUEST_EVENT, |event| {
        let TransportEvent::Request(data, responder) = event else {
            return false;
        };
        responder.resolve(json!(data["x"].as_i64().expect("x") + 1));
        true
    });

    assert_eq!(
        handle.wait_timeout(Duration::from_secs(5)).expect("late response"),
        json!(5)
    );
}

#[test]
fn dispose_resolves_pending_requests_and_stops_traffic() {
    let (server, client) = transport_pair("app");

    // No handler on the server: the request stays pending.
    let handle = client.send_request(json!({})).expect("request should send");
    client.dispose();

    assert!(matches!(
        handle.wait_timeout(Duration::from_secs(5)),
        Err(TransportError::Disposed)
    ));
    assert!(matches!(
        client.send_request(json!({})),
        Err(TransportError::Disposed)
    ));

    // The surviving side must take the disappearance quietly.
    server.send_event(json!("into the void")).expect("event send is fire-and-forget");
}
