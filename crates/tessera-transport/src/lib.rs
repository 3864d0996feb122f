//! Transport layer for Tessera.
//!
//! Provides the [`Transport`] and [`Connection`] traits, a WebSocket
//! implementation for both the accepting server and the dialing client,
//! heartbeat liveness probing, and the bounded reconnect backoff used by
//! clients.
//!
//! Frames are opaque byte buffers. WebSocket framing already delimits
//! messages, so one `send` on one side is exactly one `recv` on the other,
//! and frames on a single connection arrive in FIFO order.
//!
//! # Liveness
//!
//! Two reserved frames, [`PING_FRAME`] and [`PONG_FRAME`], are handled by the
//! connection itself: a `PING` is answered with `PONG` and neither is ever
//! returned from [`Connection::recv`]. Every inbound frame (typed or not)
//! refreshes [`Connection::last_activity`], which [`Heartbeat`] inspects.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod backoff;
mod error;
mod heartbeat;
#[cfg(feature = "websocket")]
mod websocket;

pub use backoff::ConnectPolicy;
pub use error::TransportError;
pub use heartbeat::{Heartbeat, HeartbeatConfig, Pulse};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientConnection, WebSocketConnection, WebSocketTransport, connect,
    connect_with_retry,
};

use std::fmt;

use tokio::time::Instant;

/// Reserved liveness probe. Sent as a text frame.
pub const PING_FRAME: &[u8] = b"PING";

/// Reserved liveness answer. Sent as a text frame.
pub const PONG_FRAME: &[u8] = b"PONG";

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that exchanges framed byte messages.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next typed frame from the remote peer.
    ///
    /// Reserved `PING`/`PONG` frames are consumed internally.
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Sends the reserved liveness probe.
    async fn ping(&self) -> Result<(), Self::Error> {
        self.send(PING_FRAME).await
    }

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// When the last inbound frame of any kind arrived.
    fn last_activity(&self) -> Instant;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
