//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The stream is split into a sink and a source, each behind its own lock,
//! so a task parked in `recv` never blocks another task's `send`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    ConnectPolicy, Connection, ConnectionId, PING_FRAME, PONG_FRAME,
    Transport, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection dialed by a client.
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let conn = WebSocketConnection::from_stream(ws);
        tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection, server- or client-side.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    source: Mutex<SplitStream<WebSocketStream<S>>>,
    last_activity: std::sync::Mutex<Instant>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn from_stream(ws: WebSocketStream<S>) -> Self {
        let (sink, source) = ws.split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            sink: Mutex::new(sink),
            source: Mutex::new(source),
            last_activity: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_message(Message::Binary(data.to_vec().into())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.source.lock().await.next().await;
            let data: Vec<u8> = match msg {
                Some(Ok(Message::Binary(data))) => data.into(),
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {
                    // protocol-level ping/pong/raw frame
                    self.touch();
                    continue;
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            };
            self.touch();

            if data == PING_FRAME {
                tracing::trace!(id = %self.id, "answering PING");
                self.send_message(Message::Text("PONG".into())).await?;
                continue;
            }
            if data == PONG_FRAME {
                continue;
            }
            return Ok(Some(data));
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.send_message(Message::Text("PING".into())).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn last_activity(&self) -> Instant {
        self.last_activity
            .lock()
            .map(|at| *at)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn ws_url(addr: &str) -> String {
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{addr}")
    }
}

/// Dials the server once.
///
/// # Errors
/// - [`TransportError::ConnectTimeout`] if the attempt exceeds `timeout`
/// - [`TransportError::ConnectRefused`] if the socket or upgrade is refused
pub async fn connect(
    addr: &str,
    timeout: std::time::Duration,
) -> Result<ClientConnection, TransportError> {
    let url = ws_url(addr);
    let attempt = tokio_tungstenite::connect_async(url.as_str());
    let (ws, _response) = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(tungstenite::Error::Io(e))) => {
            return Err(TransportError::ConnectRefused(e));
        }
        Ok(Err(e)) => {
            return Err(TransportError::ConnectRefused(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            )));
        }
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                addr: addr.to_string(),
                after: timeout,
            });
        }
    };

    let conn = WebSocketConnection::from_stream(ws);
    tracing::debug!(id = %conn.id, %url, "connected");
    Ok(conn)
}

/// Dials the server, retrying with linear backoff.
///
/// # Errors
/// Returns [`TransportError::ConnectionFailed`] once every attempt allowed by
/// `policy` has failed with a retryable error. Non-retryable errors are
/// returned immediately.
pub async fn connect_with_retry(
    addr: &str,
    policy: &ConnectPolicy,
) -> Result<ClientConnection, TransportError> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match connect(addr, policy.connect_timeout).await {
            Ok(conn) => return Ok(conn),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::warn!(addr, attempts, error = %e, "giving up on connect");
                return Err(TransportError::ConnectionFailed {
                    addr: addr.to_string(),
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(addr, attempt, ?delay, error = %e, "connect failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
