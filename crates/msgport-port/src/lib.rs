//! One-way, asynchronous, best-effort message-port abstraction.
//!
//! This is the lowest layer of msgport. A port delivers string payloads
//! to whatever handler the receiving side has installed at the moment of
//! delivery — nothing more. No acknowledgement, no buffering for absent
//! handlers, no ordering guarantee across a pair of ports (only FIFO per
//! direction). Masking those gaps is the job of the channel layer above.

pub mod error;
pub mod inproc;
pub mod traits;

pub use error::{PortError, Result};
pub use inproc::InProcPort;
pub use traits::{MessagePort, PortCallback, PortMessage};
