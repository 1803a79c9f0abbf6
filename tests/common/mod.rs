//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use ws_fleet::admission::{AdmissionController, ConnectionCounters, SyntheticSource};
use ws_fleet::config::{ClientConfig, FleetConfig};
use ws_fleet::http::BackendServer;
use ws_fleet::lifecycle::Shutdown;
use ws_fleet::net::{Connection, ConnectionError, DialOutcome, Dialer};

/// One scripted answer to a dial.
#[derive(Debug, Clone)]
pub enum Step {
    Fail,
    Redirect(Url),
    /// Connect; the peer records what it receives.
    Accept,
    /// Connect; the peer closes right away.
    AcceptThenClose,
    /// Connect; the peer sends one message first.
    AcceptWithGreeting(&'static str),
    /// Connect over a link that never reads and never finishes a write.
    StallWrites,
    /// Connect over a link that never reads and fails every write.
    FailWrites,
}

/// A transport with nothing to read whose writes stall or fail.
pub struct DeadLink {
    fail_writes: bool,
}

impl AsyncRead for DeadLink {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for DeadLink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        } else {
            Poll::Pending
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.fail_writes {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        } else {
            Poll::Pending
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// What a scripted peer observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Received(Vec<u8>),
    CloseReceived,
}

/// Dialer that answers from a script and records every target it dials.
/// Once the script runs out, every dial fails.
pub struct ScriptedDialer {
    steps: Mutex<VecDeque<Step>>,
    dialed: Mutex<Vec<Url>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl ScriptedDialer {
    pub fn new(steps: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            steps: Mutex::new(steps.into()),
            dialed: Mutex::new(Vec::new()),
            events,
        });
        (dialer, rx)
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect()
    }

    async fn connect(&self, target: &Url, step: Step) -> Connection {
        if let Step::StallWrites | Step::FailWrites = step {
            let link = DeadLink {
                fail_writes: matches!(step, Step::FailWrites),
            };
            let stream = WebSocketStream::from_raw_socket(link, Role::Client, None).await;
            return Connection::from_stream(stream, target.as_str(), Duration::from_millis(200));
        }

        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let mut server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        let events = self.events.clone();

        tokio::spawn(async move {
            match step {
                Step::AcceptThenClose => {
                    let _ = server.close(None).await;
                }
                Step::AcceptWithGreeting(text) => {
                    let _ = server.send(Message::text(text.to_string())).await;
                }
                _ => {}
            }
            while let Some(Ok(message)) = server.next().await {
                match message {
                    Message::Binary(data) => {
                        let _ = events.send(PeerEvent::Received(data.to_vec()));
                    }
                    Message::Text(text) => {
                        let _ = events.send(PeerEvent::Received(text.as_str().as_bytes().to_vec()));
                    }
                    Message::Close(_) => {
                        let _ = events.send(PeerEvent::CloseReceived);
                    }
                    _ => {}
                }
            }
        });

        Connection::from_stream(client, target.as_str(), Duration::from_millis(200))
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, target: &Url) -> Result<DialOutcome, ConnectionError> {
        self.dialed.lock().unwrap().push(target.clone());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Fail => Err(ConnectionError::Dial {
                target: target.to_string(),
                reason: "connection refused".into(),
            }),
            Step::Redirect(next) => Ok(DialOutcome::Redirect(next)),
            step => Ok(DialOutcome::Connected(self.connect(target, step).await)),
        }
    }
}

/// Client settings with short delays.
pub fn fast_client_config() -> ClientConfig {
    ClientConfig {
        connections: 1,
        heartbeat_interval_ms: 50,
        retry_delay_ms: 10,
        max_retries: 3,
        reconnect_delay_ms: 10,
        close_timeout_ms: 500,
        connect_timeout_ms: 1_000,
        max_redirects: 3,
        ..ClientConfig::default()
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A running backend with a synthetic memory source.
pub struct TestBackend {
    pub admission: Arc<AdmissionController>,
    pub source: Arc<SyntheticSource>,
    pub shutdown: Shutdown,
    pub handle: tokio::task::JoinHandle<()>,
}

/// Start a backend on `addr` with the given threshold and utilization.
pub async fn start_backend(addr: SocketAddr, threshold: u8, utilization: u64) -> TestBackend {
    start_backend_with(addr, threshold, utilization, |server| server).await
}

/// Like [`start_backend`], letting the caller adjust the server first.
pub async fn start_backend_with<F>(
    addr: SocketAddr,
    threshold: u8,
    utilization: u64,
    customize: F,
) -> TestBackend
where
    F: FnOnce(BackendServer) -> BackendServer,
{
    let source = Arc::new(SyntheticSource::with_utilization(utilization));
    let admission = Arc::new(AdmissionController::new(
        threshold,
        Arc::new(ConnectionCounters::new()),
        source.clone(),
    ));

    let mut config = FleetConfig::default();
    config.server.bind_address = addr.to_string();
    config.admission.threshold_percent = threshold;

    let server = customize(BackendServer::new(config, admission.clone()));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    let handle = tokio::spawn(async move {
        let _ = server.run(listener, stop, None).await;
    });

    TestBackend {
        admission,
        source,
        shutdown,
        handle,
    }
}
