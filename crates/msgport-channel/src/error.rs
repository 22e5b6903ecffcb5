/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Port-level error.
    #[error("port error: {0}")]
    Port(#[from] msgport_port::PortError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel has been destroyed.
    #[error("channel destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
