//! Backend websocket sessions.
//!
//! # Data Flow
//! ```text
//! Client ←──── frames ────→ echo_session (same frame type back)
//! ```
//!
//! # Design Decisions
//! - The admission guard lives exactly as long as the session task
//! - Ping/pong is answered by the websocket layer
//! - Server shutdown closes every session with a normal close frame

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tokio_util::sync::CancellationToken;

use crate::admission::ConnectionGuard;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    IdleTimeout,
    Shutdown,
    Error,
}

/// Echo every data frame back until the peer leaves, the session idles
/// out, or the server shuts down.
pub async fn echo_session(
    mut socket: WebSocket,
    guard: ConnectionGuard,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> SessionEnd {
    let connection_id = guard.id();
    tracing::info!(connection_id = %connection_id, "Session opened");

    let end = loop {
        let next = async {
            match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, socket.recv()).await.ok(),
                None => Some(socket.recv().await),
            }
        };

        let received = tokio::select! {
            _ = shutdown.cancelled() => break SessionEnd::Shutdown,
            received = next => received,
        };

        let reply = match received {
            None => break SessionEnd::IdleTimeout,
            Some(None) => break SessionEnd::ClientClosed,
            Some(Some(Err(e))) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Read error");
                break SessionEnd::Error;
            }
            Some(Some(Ok(Message::Close(_)))) => break SessionEnd::ClientClosed,
            Some(Some(Ok(Message::Text(text)))) => {
                tracing::debug!(connection_id = %connection_id, bytes = text.len(), "recv text");
                Message::Text(text)
            }
            Some(Some(Ok(Message::Binary(data)))) => {
                tracing::debug!(connection_id = %connection_id, bytes = data.len(), "recv binary");
                Message::Binary(data)
            }
            Some(Some(Ok(_))) => continue,
        };

        if let Err(e) = socket.send(reply).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Write error");
            break SessionEnd::Error;
        }
    };

    if matches!(end, SessionEnd::Shutdown | SessionEnd::IdleTimeout) {
        let frame = CloseFrame {
            code: axum::extract::ws::close_code::NORMAL,
            reason: "".into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
    }

    tracing::info!(connection_id = %connection_id, reason = ?end, "Session closed");
    drop(guard);
    end
}
