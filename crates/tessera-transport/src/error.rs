use std::time::Duration;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A single connect attempt did not complete in time.
    #[error("connect to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    /// The remote end refused the connection or the upgrade.
    #[error("connect refused: {0}")]
    ConnectRefused(#[source] std::io::Error),

    /// Every connect attempt failed.
    #[error("connect to {addr} failed after {attempts} attempts")]
    ConnectionFailed {
        addr: String,
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },

    /// No traffic arrived for the heartbeat's allowed number of intervals.
    #[error("connection lost: silent for {silent_for:?}")]
    ConnectionLost { silent_for: Duration },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether a fresh connect attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::ConnectRefused(_)
        )
    }
}
