//! Client lifecycle state and retry bookkeeping.
//!
//! # State Transitions
//! ```text
//! Disconnected → Connecting: start, or reconnect delay elapsed
//! Connecting → Connected:    dial (after redirects) succeeded
//! Connecting → Connecting:   dial failed, retry delay elapsed
//! Connected → Disconnected:  read/write/heartbeat failure
//! Connected → Draining:      external cancellation
//! Draining → Disconnected:   close handshake done or timed out (terminal)
//! ```

use url::Url;

use crate::net::ConnectionId;

/// Lifecycle state of a reconnecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub state: ClientState,
    pub retry_count: u32,
    pub target: Url,
    pub connection: Option<ConnectionId>,
}

/// Which address to dial next and how many consecutive failures it has seen.
#[derive(Debug, Clone)]
pub struct RetryState {
    original: Url,
    target: Url,
    count: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(original: Url, max_retries: u32) -> Self {
        Self {
            target: original.clone(),
            original,
            count: 0,
            max_retries: max_retries.max(1),
        }
    }

    /// Address the next attempt dials.
    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn original(&self) -> &Url {
        &self.original
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Record a failed dial. Returns `true` when the budget ran out and the
    /// target fell back to the original address.
    pub fn record_failure(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.max_retries {
            self.fall_back();
            return true;
        }
        false
    }

    /// Record a successful dial that landed on `landed` (after redirects).
    pub fn record_success(&mut self, landed: Url) {
        self.count = 0;
        self.target = landed;
    }

    /// Return to the original address with a fresh budget.
    pub fn fall_back(&mut self) {
        self.target = self.original.clone();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> Url {
        Url::parse("ws://proxy:8080/ws").unwrap()
    }

    fn backend() -> Url {
        Url::parse("ws://10.0.0.7:8080/ws").unwrap()
    }

    #[test]
    fn success_resets_counter() {
        let mut retry = RetryState::new(proxy(), 3);
        assert!(!retry.record_failure());
        assert!(!retry.record_failure());
        assert_eq!(retry.count(), 2);

        retry.record_success(backend());
        assert_eq!(retry.count(), 0);
        assert_eq!(retry.target(), &backend());
    }

    #[test]
    fn exhausted_budget_falls_back_to_original() {
        let mut retry = RetryState::new(proxy(), 3);
        retry.record_success(backend());

        assert!(!retry.record_failure());
        assert!(!retry.record_failure());
        assert_eq!(retry.target(), &backend());
        assert!(retry.record_failure());

        assert_eq!(retry.target(), &proxy());
        assert_eq!(retry.count(), 0);
    }

    #[test]
    fn zero_budget_is_treated_as_one() {
        let mut retry = RetryState::new(proxy(), 0);
        retry.record_success(backend());
        assert!(retry.record_failure());
        assert_eq!(retry.target(), &proxy());
    }
}
