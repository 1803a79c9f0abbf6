//! Live-connection and dropped-request counters.
//!
//! All counters are atomics shared through an `Arc`; nothing here locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::net::ConnectionId;
use crate::observability::metrics;

/// The cumulative dropped counter restarts at zero once it passes this mark.
pub const CUMULATIVE_RESET_MARK: u64 = u64::MAX - 1_000_000;

/// Shared admission counters, injected into the controller and the reporter.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    active: AtomicU64,
    dropped_interval: AtomicU64,
    dropped_total: AtomicU64,
}

impl ConnectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new live connection. The count drops again when the guard
    /// is dropped, whether the session ends normally, with an error, or by
    /// panic unwinding.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            id: ConnectionId::new(),
            counters: Arc::clone(self),
        }
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Count one refused request in both dropped counters.
    pub fn record_drop(&self) {
        self.dropped_interval.fetch_add(1, Ordering::AcqRel);
        let total = self.dropped_total.fetch_add(1, Ordering::AcqRel) + 1;
        if total > CUMULATIVE_RESET_MARK {
            self.dropped_total.store(0, Ordering::Release);
            tracing::info!("Cumulative dropped counter reset");
        }
    }

    pub fn dropped_interval(&self) -> u64 {
        self.dropped_interval.load(Ordering::Acquire)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Acquire)
    }

    /// Return the dropped count for the interval that just ended and start
    /// a new one. The cumulative count is untouched.
    pub fn roll_interval(&self) -> u64 {
        self.dropped_interval.swap(0, Ordering::AcqRel)
    }

    fn release(&self) {
        // Never goes below zero, even if a guard somehow outlives a reset.
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[cfg(test)]
    pub(crate) fn set_dropped_total(&self, value: u64) {
        self.dropped_total.store(value, Ordering::Release);
    }
}

/// Holds one slot of the live-connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    counters: Arc<ConnectionCounters>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.release();
        metrics::record_active_connections(self.counters.active());
        tracing::trace!(connection_id = %self.id, active = self.counters.active(), "Connection released");
    }
}
