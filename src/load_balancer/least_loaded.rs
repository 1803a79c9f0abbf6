//! Least-loaded selection strategy.

use crate::load_balancer::{SelectError, Selector};
use crate::registry::Instance;

/// Picks the instance reporting the fewest active connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for LeastLoaded {
    fn pick<'a>(&self, instances: &'a [Instance]) -> Result<&'a Instance, SelectError> {
        // min_by_key keeps the first of equal minima, so ties go to the
        // earliest instance in the snapshot.
        instances
            .iter()
            .min_by_key(|instance| instance.load)
            .ok_or(SelectError::NoInstances)
    }
}
