//! Memory-threshold admission decisions.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::admission::counters::{ConnectionCounters, ConnectionGuard};
use crate::admission::sampler::MetricsSource;
use crate::observability::metrics;

/// Decides whether a new websocket session may be accepted.
pub struct AdmissionController {
    threshold: AtomicU8,
    counters: Arc<ConnectionCounters>,
    source: Arc<dyn MetricsSource>,
}

impl AdmissionController {
    /// `threshold` is a percentage of reserved memory, clamped to 1..=100.
    pub fn new(
        threshold: u8,
        counters: Arc<ConnectionCounters>,
        source: Arc<dyn MetricsSource>,
    ) -> Self {
        Self {
            threshold: AtomicU8::new(threshold.clamp(1, 100)),
            counters,
            source,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Acquire)
    }

    /// Change the threshold at runtime.
    pub fn set_threshold(&self, threshold: u8) {
        let threshold = threshold.clamp(1, 100);
        let previous = self.threshold.swap(threshold, Ordering::AcqRel);
        if previous != threshold {
            tracing::info!(previous, threshold, "Load-shedding threshold updated");
        }
    }

    pub fn memory_utilization(&self) -> f64 {
        self.source.memory().utilization_percent()
    }

    /// The admission check without side effects.
    pub fn would_admit(&self) -> bool {
        self.memory_utilization() <= f64::from(self.threshold())
    }

    /// Admit or refuse one upgrade request. A refusal is counted.
    pub fn admit(&self) -> bool {
        let utilization = self.memory_utilization();
        let threshold = self.threshold();
        if utilization <= f64::from(threshold) {
            return true;
        }
        self.counters.record_drop();
        metrics::record_dropped_request();
        tracing::warn!(
            memory_percent = utilization,
            threshold,
            dropped = self.counters.dropped_interval(),
            "Memory above threshold, refusing connection"
        );
        false
    }

    /// Count an admitted session for as long as the guard lives.
    pub fn track(&self) -> ConnectionGuard {
        let guard = self.counters.track();
        metrics::record_active_connections(self.counters.active());
        guard
    }

    pub fn counters(&self) -> &Arc<ConnectionCounters> {
        &self.counters
    }

    pub fn source(&self) -> &Arc<dyn MetricsSource> {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::sampler::SyntheticSource;

    fn controller(threshold: u8, utilization: u64) -> (AdmissionController, Arc<SyntheticSource>) {
        let source = Arc::new(SyntheticSource::with_utilization(utilization));
        let controller =
            AdmissionController::new(threshold, Arc::new(ConnectionCounters::new()), source.clone());
        (controller, source)
    }

    #[test]
    fn admits_at_or_below_threshold() {
        let (controller, source) = controller(50, 40);
        assert!(controller.admit());
        source.set_utilization(50);
        assert!(controller.admit());
        assert_eq!(controller.counters().dropped_total(), 0);
    }

    #[test]
    fn each_rejection_counts_once() {
        let (controller, _source) = controller(50, 51);
        assert!(!controller.admit());
        assert!(!controller.admit());
        assert_eq!(controller.counters().dropped_interval(), 2);
        assert_eq!(controller.counters().dropped_total(), 2);
    }

    #[test]
    fn would_admit_does_not_count() {
        let (controller, _source) = controller(50, 90);
        assert!(!controller.would_admit());
        assert_eq!(controller.counters().dropped_total(), 0);
    }

    #[test]
    fn threshold_adjustable_at_runtime() {
        let (controller, _source) = controller(50, 70);
        assert!(!controller.would_admit());
        controller.set_threshold(80);
        assert!(controller.would_admit());
        controller.set_threshold(0);
        assert_eq!(controller.threshold(), 1);
    }

    #[test]
    fn track_holds_active_count() {
        let (controller, _source) = controller(50, 10);
        let guard = controller.track();
        assert_eq!(controller.counters().active(), 1);
        drop(guard);
        assert_eq!(controller.counters().active(), 0);
    }
}
