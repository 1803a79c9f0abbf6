//! Reconnecting websocket client.
//!
//! # Responsibilities
//! - Dial the target, following redirects
//! - Retry failed dials with a fixed delay; fall back to the original
//!   target once the retry budget is spent
//! - While connected, run a read task and send heartbeats
//! - Reconnect after any connection loss
//! - Drain and exit on external cancellation (the only terminal exit)

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::state::{ClientState, ClientStatus, RetryState};
use crate::config::ClientConfig;
use crate::net::{dial_following_redirects, Connection, ConnectionError, Dialer};
use crate::observability::metrics;

/// A payload received by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub client_id: usize,
    pub payload: Vec<u8>,
}

/// How a read task ended. Sent once per connection on the done-signal.
#[derive(Debug)]
enum ReadEnd {
    Closed,
    Failed(ConnectionError),
}

/// Why the connected phase ended.
enum Exit {
    Lost(String),
    Cancelled,
}

/// Client timings, resolved from `ClientConfig`.
#[derive(Debug, Clone)]
struct Timings {
    heartbeat: Duration,
    retry_delay: Duration,
    reconnect_delay: Duration,
    close_timeout: Duration,
    max_redirects: usize,
}

impl From<&ClientConfig> for Timings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            heartbeat: Duration::from_millis(config.heartbeat_interval_ms.max(1)),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            max_redirects: config.max_redirects,
        }
    }
}

/// One long-lived client connection that survives failures and redirects.
pub struct ReconnectingClient {
    id: usize,
    timings: Timings,
    retry: RetryState,
    dialer: Arc<dyn Dialer>,
    cancel: CancellationToken,
    inbound: Option<mpsc::Sender<Inbound>>,
    status: watch::Sender<ClientStatus>,
}

impl ReconnectingClient {
    /// Create a client that dials `target` until `cancel` fires.
    pub fn new(
        id: usize,
        target: Url,
        config: &ClientConfig,
        dialer: Arc<dyn Dialer>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(ClientStatus {
            state: ClientState::Disconnected,
            retry_count: 0,
            target: target.clone(),
            connection: None,
        });
        Self {
            id,
            timings: Timings::from(config),
            retry: RetryState::new(target, config.max_retries),
            dialer,
            cancel,
            inbound: None,
            status,
        }
    }

    /// Deliver received payloads to `tx` instead of only logging them.
    pub fn with_inbound(mut self, tx: mpsc::Sender<Inbound>) -> Self {
        self.inbound = Some(tx);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Subscribe to state changes.
    pub fn status(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    fn heartbeat_payload(&self) -> Vec<u8> {
        format!("hello from client {}", self.id).into_bytes()
    }

    fn publish(&self, state: ClientState, connection: Option<&Connection>) {
        self.status.send_replace(ClientStatus {
            state,
            retry_count: self.retry.count(),
            target: self.retry.target().clone(),
            connection: connection.map(Connection::id),
        });
    }

    /// Wait `delay`, returning `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = time::sleep(delay) => true,
        }
    }

    /// Drive the client until cancelled.
    pub async fn run(mut self) {
        tracing::info!(client_id = self.id, target = %self.retry.target(), "Client starting");

        loop {
            self.publish(ClientState::Connecting, None);

            let cancel = self.cancel.clone();
            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                attempt = dial_following_redirects(
                    self.dialer.as_ref(),
                    self.retry.target(),
                    self.timings.max_redirects,
                ) => attempt,
            };

            let (conn, landed) = match attempt {
                Ok(ok) => ok,
                Err(e) => {
                    self.on_dial_failure(&e);
                    self.publish(ClientState::Connecting, None);
                    if self.pause(self.timings.retry_delay).await {
                        continue;
                    }
                    break;
                }
            };

            if &landed != self.retry.target() {
                tracing::info!(client_id = self.id, target = %landed, "Redirect target is now the working target");
            }
            self.retry.record_success(landed);
            let conn = Arc::new(conn);
            self.publish(ClientState::Connected, Some(&*conn));
            tracing::info!(client_id = self.id, connection_id = %conn.id(), peer = %conn.peer(), "Connected");

            match self.connected(conn.clone()).await {
                Exit::Cancelled => {
                    self.publish(ClientState::Disconnected, None);
                    tracing::info!(client_id = self.id, "Client stopped");
                    return;
                }
                Exit::Lost(reason) => {
                    self.publish(ClientState::Disconnected, None);
                    metrics::record_reconnect();
                    tracing::warn!(client_id = self.id, reason = %reason, "Connection lost, reconnecting");
                    if !self.pause(self.timings.reconnect_delay).await {
                        break;
                    }
                }
            }
        }

        self.publish(ClientState::Disconnected, None);
        tracing::info!(client_id = self.id, "Client stopped");
    }

    fn on_dial_failure(&mut self, error: &ConnectionError) {
        let fell_back = match error {
            ConnectionError::RedirectLoop { .. } => {
                self.retry.fall_back();
                true
            }
            _ => self.retry.record_failure(),
        };
        tracing::warn!(
            client_id = self.id,
            error = %error,
            retry_count = self.retry.count(),
            retry_in = ?self.timings.retry_delay,
            "Dial failed"
        );
        if fell_back {
            tracing::info!(
                client_id = self.id,
                target = %self.retry.original(),
                "Retry budget exhausted, falling back to original target"
            );
        }
    }

    /// Connected phase: read task plus heartbeat loop.
    async fn connected(&self, conn: Arc<Connection>) -> Exit {
        let (done_tx, mut done_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            self.id,
            conn.clone(),
            self.inbound.clone(),
            done_tx,
        ));

        let period = self.timings.heartbeat;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let payload = self.heartbeat_payload();

        let exit = loop {
            tokio::select! {
                end = &mut done_rx => {
                    let reason = match end {
                        Ok(ReadEnd::Closed) => "closed by peer".to_string(),
                        Ok(ReadEnd::Failed(e)) => e.to_string(),
                        Err(_) => "read task ended".to_string(),
                    };
                    break Exit::Lost(reason);
                }
                _ = heartbeat.tick() => {
                    // A heartbeat still unsent when the next one is due means the link is stuck.
                    let sent = tokio::select! {
                        _ = self.cancel.cancelled() => break Exit::Cancelled,
                        sent = time::timeout(period, conn.send(payload.clone())) => sent,
                    };
                    match sent {
                        Ok(Ok(())) => tracing::trace!(client_id = self.id, "Heartbeat sent"),
                        Ok(Err(e)) => {
                            tracing::warn!(client_id = self.id, error = %e, "Heartbeat failed");
                            break Exit::Lost(e.to_string());
                        }
                        Err(_) => {
                            tracing::warn!(client_id = self.id, waited = ?period, "Heartbeat write stalled");
                            break Exit::Lost(format!("heartbeat write stalled for {:?}", period));
                        }
                    }
                }
                _ = self.cancel.cancelled() => break Exit::Cancelled,
            }
        };
        drop(heartbeat);

        if let Exit::Cancelled = exit {
            self.publish(ClientState::Draining, Some(&*conn));
            tracing::info!(client_id = self.id, "Interrupt received, draining");
            if let Err(e) = conn.send_close().await {
                tracing::warn!(client_id = self.id, error = %e, "Write close failed");
            }
            if time::timeout(self.timings.close_timeout, &mut done_rx)
                .await
                .is_err()
            {
                tracing::debug!(client_id = self.id, "Peer did not acknowledge close in time");
            }
        }

        conn.close().await;
        reader.abort();
        exit
    }
}

/// Consume inbound payloads until the connection ends, then fire the
/// done-signal. The sender is consumed, so the signal fires at most once.
async fn read_loop(
    client_id: usize,
    conn: Arc<Connection>,
    inbound: Option<mpsc::Sender<Inbound>>,
    done: oneshot::Sender<ReadEnd>,
) {
    let mut incoming = Box::pin(conn.clone().incoming());
    let end = loop {
        match incoming.next().await {
            Some(Ok(payload)) => {
                tracing::debug!(client_id, bytes = payload.len(), "recv");
                if let Some(tx) = &inbound {
                    if tx.send(Inbound { client_id, payload }).await.is_err() {
                        tracing::trace!(client_id, "Inbound receiver dropped");
                    }
                }
            }
            Some(Err(e)) => break ReadEnd::Failed(e),
            None => break ReadEnd::Closed,
        }
    };

    match &end {
        ReadEnd::Closed => {
            tracing::info!(client_id, connection_id = %conn.id(), "Connection closed normally")
        }
        ReadEnd::Failed(e) => {
            tracing::warn!(client_id, connection_id = %conn.id(), error = %e, "Unexpected read error")
        }
    }
    let _ = done.send(end);
}
