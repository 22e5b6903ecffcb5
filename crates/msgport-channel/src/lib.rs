//! Scope-isolated bidirectional channel over raw message ports.
//!
//! This is the core value-add layer of msgport. A raw port is one-way,
//! best-effort, and blind to whether anyone is listening on the far end.
//! The channel masks that with:
//! - A marker + scope wire envelope, so channel traffic coexists with
//!   arbitrary other traffic on the same port and multiple channels can
//!   share one port pair.
//! - A probe-token readiness handshake that tolerates either endpoint
//!   starting first.
//! - FIFO buffering of outbound sends until the handshake completes, and
//!   per-method buffering of inbound payloads until a listener exists.

pub mod channel;
pub mod error;
pub mod wire;

pub use channel::{ChannelConfig, MessageChannel};
pub use error::{ChannelError, Result};
pub use wire::{probe_token, WireMessage, DEFAULT_PROBE_INTERVAL, PROBE_METHOD};
