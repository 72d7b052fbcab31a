/// Errors that can occur on a relay channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the relay connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The relay connection is closed; nothing can be sent on it.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The relay was shut down underneath the channel.
    #[error("relay shut down")]
    Shutdown,
}
