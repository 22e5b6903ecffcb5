use std::sync::Arc;

use crate::error::Result;

/// A raw message delivered by a port.
///
/// The origin identifies the sending endpoint and is attached by the port
/// implementation, not by the sender — receivers use it for allow-list
/// filtering at the channel layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMessage {
    /// The serialized payload, as handed to `post` on the other side.
    pub payload: String,
    /// Origin of the sending endpoint.
    pub origin: String,
}

/// Inbound message handler installed on a port.
pub type PortCallback = Arc<dyn Fn(PortMessage) + Send + Sync>;

/// One-way, asynchronous, best-effort message delivery.
///
/// This is the fundamental primitive the rest of msgport builds on. The
/// contract is deliberately weak:
/// - `post` hands the payload off and returns; delivery happens later,
///   on the receiving side's delivery context.
/// - A message that arrives while no handler is installed is dropped.
/// - Payloads are opaque strings; framing and addressing live above.
pub trait MessagePort: Send + Sync {
    /// Send a payload to the remote endpoint (fire-and-forget).
    fn post(&self, payload: &str) -> Result<()>;

    /// Install the inbound handler, replacing any previous one.
    fn set_on_message(&self, callback: PortCallback);

    /// Detach the inbound handler. Subsequent deliveries are dropped.
    fn clear_on_message(&self);

    /// Tear the port down. Subsequent `post` calls fail with `Closed`.
    fn close(&self);
}
