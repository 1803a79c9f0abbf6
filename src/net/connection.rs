//! Websocket connection with a closed-once lifecycle.
//!
//! # Responsibilities
//! - Own one duplex link, split into a sink half and a source half
//! - Send and receive opaque payloads
//! - Expose inbound traffic as a lazy stream
//! - Release the transport exactly once, whichever path closes first
//!
//! # Design Decisions
//! - Sink and source sit behind separate locks so a read task can wait on
//!   the source while the control loop writes heartbeats
//! - A cancellation token unblocks pending reads and writes on close
//! - Every step of `close()` is bounded by `close_timeout`

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::net::ConnectionError;

/// Global atomic counter for connection IDs.
/// Relaxed ordering: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
type FrameSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// One live websocket link.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    /// `None` once the transport has been released.
    sink: Mutex<Option<FrameSink>>,
    source: Mutex<FrameSource>,
    closed: AtomicBool,
    close_sent: AtomicBool,
    cancel: CancellationToken,
    close_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wrap an upgraded websocket stream.
    pub fn from_stream<S>(
        stream: WebSocketStream<S>,
        peer: impl Into<String>,
        close_timeout: Duration,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        let conn = Self {
            id: ConnectionId::new(),
            peer: peer.into(),
            sink: Mutex::new(Some(Box::pin(sink))),
            source: Mutex::new(Box::pin(source)),
            closed: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            close_timeout,
        };
        tracing::debug!(connection_id = %conn.id, peer = %conn.peer, "Connection opened");
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address this connection was dialed at.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send one binary payload.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectionError::Closed)?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ConnectionError::Closed),
            result = sink.send(Message::binary(payload)) => {
                result.map_err(|e| ConnectionError::Write(e.to_string()))
            }
        }
    }

    /// Wait for the next inbound payload.
    ///
    /// Control frames are skipped. Returns `Closed` on a close frame, end of
    /// stream, or local close.
    pub async fn receive(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut source = self.source.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ConnectionError::Closed),
                next = source.next() => next,
            };
            match next {
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(
                        connection_id = %self.id,
                        code = ?frame.as_ref().map(|f| f.code),
                        "Close frame received"
                    );
                    return Err(ConnectionError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(ConnectionError::Closed)
                }
                Some(Err(e)) => return Err(ConnectionError::Read(e.to_string())),
            }
        }
    }

    /// Inbound payloads as a lazy stream.
    ///
    /// Ends after a close; yields one `Err` and then ends on a read failure.
    pub fn incoming(self: Arc<Self>) -> impl Stream<Item = Result<Vec<u8>, ConnectionError>> + Send {
        futures_util::stream::unfold(Some(self), |state| async move {
            let conn = state?;
            match conn.receive().await {
                Ok(payload) => Some((Ok(payload), Some(conn))),
                Err(ConnectionError::Closed) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Send a normal-closure notification to the peer, at most once.
    ///
    /// Does not release the transport; the peer's reply still reaches readers.
    pub async fn send_close(&self) -> Result<(), ConnectionError> {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        };
        let attempt = async {
            let mut guard = self.sink.lock().await;
            match guard.as_mut() {
                Some(sink) => sink
                    .send(Message::Close(Some(frame)))
                    .await
                    .map_err(|e| ConnectionError::Write(e.to_string())),
                None => Err(ConnectionError::Closed),
            }
        };
        match timeout(self.close_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Write("close notification timed out".into())),
        }
    }

    /// Close the connection and release the transport.
    ///
    /// Safe to call from any number of paths concurrently. Returns `true`
    /// only for the call that performed the release.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.send_close().await {
            tracing::debug!(connection_id = %self.id, error = %e, "Graceful close skipped");
        }
        self.cancel.cancel();

        let released = {
            let mut guard = self.sink.lock().await;
            guard.take()
        };
        if let Some(mut sink) = released {
            if timeout(self.close_timeout, sink.close()).await.is_err() {
                tracing::debug!(connection_id = %self.id, "Transport close timed out, dropping");
            }
        }

        tracing::debug!(connection_id = %self.id, peer = %self.peer, "Connection released");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (Connection, WebSocketStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (
            Connection::from_stream(client, "ws://test/ws", Duration::from_millis(200)),
            server,
        )
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn send_and_receive() {
        let (conn, mut server) = pair().await;

        conn.send(b"ping".to_vec()).await.unwrap();
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.into_data().to_vec(), b"ping".to_vec());

        server.send(Message::text("pong".to_string())).await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), b"pong".to_vec());
    }

    #[tokio::test]
    async fn peer_close_ends_incoming() {
        let (conn, mut server) = pair().await;
        let conn = Arc::new(conn);

        server.send(Message::binary(b"one".to_vec())).await.unwrap();
        server.close(None).await.unwrap();

        let received: Vec<_> = conn.clone().incoming().collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_ref().unwrap(), &b"one".to_vec());
    }

    #[tokio::test]
    async fn concurrent_close_releases_once() {
        let (conn, _server) = pair().await;
        let conn = Arc::new(conn);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let conn = conn.clone();
            handles.push(tokio::spawn(async move { conn.close().await }));
        }

        let mut releases = 0;
        for handle in handles {
            if handle.await.unwrap() {
                releases += 1;
            }
        }
        assert_eq!(releases, 1);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(b"late".to_vec()).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_unblocks_pending_receive() {
        let (conn, _server) = pair().await;
        let conn = Arc::new(conn);

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(conn.close().await);
        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should observe close")
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }
}
