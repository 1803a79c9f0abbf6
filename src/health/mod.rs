//! Health and load-shedding probes.
//!
//! # Endpoints
//! - `/health`: 200 "OK" while the process serves requests
//! - `/load-shedding`: 200 "OK" when a new session would be admitted,
//!   503 otherwise; never counts as a dropped request

use axum::http::StatusCode;

use crate::admission::AdmissionController;

/// Liveness probe.
pub async fn health() -> &'static str {
    "OK"
}

/// Whether this instance is currently accepting sessions.
pub fn load_shedding_status(admission: &AdmissionController) -> (StatusCode, &'static str) {
    if admission.would_admit() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{ConnectionCounters, SyntheticSource};
    use std::sync::Arc;

    #[test]
    fn load_shedding_follows_threshold_without_counting() {
        let source = Arc::new(SyntheticSource::with_utilization(30));
        let admission = AdmissionController::new(50, Arc::new(ConnectionCounters::new()), source.clone());
        assert_eq!(load_shedding_status(&admission).0, StatusCode::OK);

        source.set_utilization(75);
        assert_eq!(load_shedding_status(&admission).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(admission.counters().dropped_total(), 0);
    }
}
