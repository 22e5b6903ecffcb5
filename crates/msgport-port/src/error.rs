/// Errors that can occur on a raw message port.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The port has been closed locally.
    #[error("port closed")]
    Closed,

    /// The remote endpoint is gone and can no longer receive.
    #[error("port disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, PortError>;
