//! Dialing websocket targets and following redirects.
//!
//! # Responsibilities
//! - Open a websocket over HTTP upgrade
//! - Turn 301/302/307/308 + `Location` into a redirect outcome
//! - Follow redirect chains iteratively, bounded by a hop limit
//!
//! # Design Decisions
//! - A redirect is an outcome, not an error: following it never counts
//!   against the caller's retry budget
//! - Relative `Location` values resolve against the URL that produced them

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::{header::LOCATION, StatusCode};
use tokio_tungstenite::tungstenite::Error as WsError;
use url::Url;

use crate::net::{Connection, ConnectionError};

/// Result of a single dial.
#[derive(Debug)]
pub enum DialOutcome {
    /// The upgrade completed.
    Connected(Connection),
    /// The server pointed somewhere else.
    Redirect(Url),
}

/// Opens connections to websocket targets.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &Url) -> Result<DialOutcome, ConnectionError>;
}

/// Dialer backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WsDialer {
    pub fn new(connect_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout,
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, target: &Url) -> Result<DialOutcome, ConnectionError> {
        let attempt = tokio_tungstenite::connect_async(target.as_str());
        let result = match timeout(self.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ConnectionError::Dial {
                    target: target.to_string(),
                    reason: format!("timed out after {:?}", self.connect_timeout),
                })
            }
        };

        match result {
            Ok((stream, _response)) => Ok(DialOutcome::Connected(Connection::from_stream(
                stream,
                target.as_str(),
                self.close_timeout,
            ))),
            Err(WsError::Http(response)) => {
                let status = response.status();
                if is_redirect(status) {
                    if let Some(location) = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                    {
                        let next = target.join(location).map_err(|e| {
                            ConnectionError::InvalidTarget(format!("{}: {}", location, e))
                        })?;
                        return Ok(DialOutcome::Redirect(next));
                    }
                }
                Err(ConnectionError::Rejected {
                    target: target.to_string(),
                    status: status.as_u16(),
                })
            }
            Err(e) => Err(ConnectionError::Dial {
                target: target.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Dial `origin`, following redirects up to `max_hops`.
///
/// Returns the connection and the URL that finally accepted it.
pub async fn dial_following_redirects(
    dialer: &dyn Dialer,
    origin: &Url,
    max_hops: usize,
) -> Result<(Connection, Url), ConnectionError> {
    let mut target = origin.clone();
    let mut hops = 0;

    loop {
        match dialer.dial(&target).await? {
            DialOutcome::Connected(conn) => return Ok((conn, target)),
            DialOutcome::Redirect(next) => {
                hops += 1;
                if hops > max_hops {
                    return Err(ConnectionError::RedirectLoop {
                        origin: origin.to_string(),
                        max_hops,
                    });
                }
                tracing::info!(from = %target, to = %next, hop = hops, "Following redirect");
                target = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    /// Redirects `redirects` times, then connects over an in-memory pipe.
    struct Chain {
        redirects: usize,
        dials: AtomicUsize,
    }

    #[async_trait]
    impl Dialer for Chain {
        async fn dial(&self, target: &Url) -> Result<DialOutcome, ConnectionError> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            if n < self.redirects {
                return Ok(DialOutcome::Redirect(
                    target.join(&format!("/hop-{}", n + 1)).unwrap(),
                ));
            }
            let (a, _b) = tokio::io::duplex(1024);
            let stream = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
            Ok(DialOutcome::Connected(Connection::from_stream(
                stream,
                target.as_str(),
                Duration::from_millis(50),
            )))
        }
    }

    fn origin() -> Url {
        Url::parse("ws://proxy.local/ws").unwrap()
    }

    #[tokio::test]
    async fn follows_chain_within_bound() {
        let dialer = Chain {
            redirects: 3,
            dials: AtomicUsize::new(0),
        };
        let (_conn, landed) = dial_following_redirects(&dialer, &origin(), 3).await.unwrap();
        assert_eq!(landed.as_str(), "ws://proxy.local/hop-3");
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn chain_past_bound_is_a_redirect_loop() {
        let dialer = Chain {
            redirects: 4,
            dials: AtomicUsize::new(0),
        };
        let err = dial_following_redirects(&dialer, &origin(), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::RedirectLoop { max_hops: 3, .. }));
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn redirect_statuses() {
        assert!(is_redirect(StatusCode::TEMPORARY_REDIRECT));
        assert!(is_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(is_redirect(StatusCode::FOUND));
        assert!(!is_redirect(StatusCode::SERVICE_UNAVAILABLE));
    }
}
