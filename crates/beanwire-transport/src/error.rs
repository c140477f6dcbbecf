/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// An outgoing connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Binding, listening, or accepting failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Reading from an open connection failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Writing to an open connection failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// A host/port pair did not resolve to any address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No Tokio runtime was available to drive the I/O tasks.
    #[error("no tokio runtime available")]
    NoRuntime,
}
