//! Request/response and event multiplexing over pluggable backends.
//!
//! This is the "just works" layer. A `Transport` gives structured
//! semantics — fire-and-forget events, correlated request/response pairs,
//! listener-based dispatch with claim-or-backlog replay — over any
//! backend implementing the three-operation contract (send, receive
//! callback, dispose). `ChannelBackend` binds a `MessageChannel` to that
//! contract.

pub mod backend;
pub mod envelope;
pub mod error;
pub mod transport;

pub use backend::{Backend, ChannelBackend, ReceiveCallback, MESSAGE_METHOD};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{Result, TransportError};
pub use transport::{
    Listener, RequestHandle, Responder, Transport, TransportEvent, EVENT_EVENT, REQUEST_EVENT,
};
