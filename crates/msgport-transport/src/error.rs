/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No backend is configured.
    #[error("no backend configured")]
    NoBackend,

    /// Channel-level error from a channel backend.
    #[error("channel error: {0}")]
    Channel(#[from] msgport_channel::ChannelError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote endpoint answered the request with an error payload.
    #[error("request failed: {0}")]
    ErrorResponse(serde_json::Value),

    /// The response carried neither a result nor an error.
    #[error("unexpected response format (neither result nor error)")]
    MalformedResponse,

    /// The transport was disposed while the request was pending.
    #[error("transport disposed")]
    Disposed,

    /// No response arrived within the caller-supplied deadline.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, TransportError>;
