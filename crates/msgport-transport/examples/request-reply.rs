//! Minimal request/reply demo — two transports over one in-process port
//! pair, one answering doubling requests from the other.
//!
//! Run with:
//!   cargo run --example request-reply

use std::time::Duration;

use msgport_channel::MessageChannel;
use msgport_port::InProcPort;
use msgport_transport::{ChannelBackend, Transport, TransportEvent, REQUEST_EVENT};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (server_port, client_port) = InProcPort::pair("https://server", "https://client");

    let server = Transport::with_backend(ChannelBackend::new(MessageChannel::open(
        "demo",
        server_port,
    )));
    server.on(REQUEST_EVENT, |event| {
        let TransportEvent::Request(data, responder) = event else {
            return false;
        };
        match data["x"].as_i64() {
            Some(x) => responder.resolve(json!(x * 2)),
            None => responder.reject(json!("expected a numeric x")),
        }
        true
    });

    let client = Transport::with_backend(ChannelBackend::new(MessageChannel::open(
        "demo",
        client_port,
    )));

    // The handshake completes in the background; requests issued before
    // confirmation are buffered and flushed once the pair is live.
    let handle = client.send_request(json!({"x": 21}))?;
    let result = handle.wait_timeout(Duration::from_secs(5))?;
    eprintln!("21 doubled is {result}");

    let bad = client.send_request(json!({"x": "twenty-one"}))?;
    match bad.wait_timeout(Duration::from_secs(5)) {
        Ok(result) => eprintln!("unexpected success: {result}"),
        Err(err) => eprintln!("rejected as expected: {err}"),
    }

    Ok(())
}
