//! Resource sampling for admission and reporting.
//!
//! # Design Decisions
//! - Memory utilization is host memory in use over total host memory, as
//!   reported by `sysinfo`. It stands in for a container's usage/reservation
//!   pair and is an approximation on shared hosts.
//! - CPU load is a heuristic: alive runtime tasks over a short window,
//!   divided by available parallelism, clamped to [0, 100]. It is not a
//!   measurement of processor time.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::System;

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub reserved_bytes: u64,
}

impl MemorySample {
    /// `used * 100 / reserved`, or 0 when nothing is reserved.
    pub fn utilization_percent(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as u128 * 10_000 / self.reserved_bytes as u128) as f64 / 100.0
    }
}

/// Where resource readings come from.
pub trait MetricsSource: Send + Sync {
    fn memory(&self) -> MemorySample;

    /// Tasks currently alive on the runtime.
    fn task_count(&self) -> usize;
}

/// Reads the host through `sysinfo` and the current tokio runtime.
pub struct SystemSource {
    system: Mutex<System>,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemSource {
    fn memory(&self) -> MemorySample {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();
        MemorySample {
            used_bytes: system.used_memory(),
            reserved_bytes: system.total_memory(),
        }
    }

    fn task_count(&self) -> usize {
        tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_alive_tasks())
            .unwrap_or(0)
    }
}

/// Fixed readings for tests and demos.
#[derive(Debug)]
pub struct SyntheticSource {
    used_bytes: AtomicU64,
    reserved_bytes: AtomicU64,
    tasks: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(used_bytes: u64, reserved_bytes: u64) -> Self {
        Self {
            used_bytes: AtomicU64::new(used_bytes),
            reserved_bytes: AtomicU64::new(reserved_bytes),
            tasks: AtomicUsize::new(0),
        }
    }

    /// Reserve 100 units and use `percent` of them.
    pub fn with_utilization(percent: u64) -> Self {
        Self::new(percent, 100)
    }

    pub fn set_utilization(&self, percent: u64) {
        self.reserved_bytes.store(100, Ordering::Release);
        self.used_bytes.store(percent, Ordering::Release);
    }

    pub fn set_task_count(&self, tasks: usize) {
        self.tasks.store(tasks, Ordering::Release);
    }
}

impl MetricsSource for SyntheticSource {
    fn memory(&self) -> MemorySample {
        MemorySample {
            used_bytes: self.used_bytes.load(Ordering::Acquire),
            reserved_bytes: self.reserved_bytes.load(Ordering::Acquire),
        }
    }

    fn task_count(&self) -> usize {
        self.tasks.load(Ordering::Acquire)
    }
}

/// CPU load estimate from a task count over `elapsed`.
pub fn cpu_load_from(tasks: usize, parallelism: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if parallelism == 0 || secs <= 0.0 {
        return 0.0;
    }
    let load = tasks as f64 / (parallelism as f64 * secs) * 100.0;
    load.clamp(0.0, 100.0)
}

/// Sample the task count, wait `window`, and estimate CPU load.
pub async fn estimate_cpu_load(source: &dyn MetricsSource, window: Duration) -> f64 {
    let start = Instant::now();
    tokio::time::sleep(window).await;
    let tasks = source.task_count();
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpu_load_from(tasks, parallelism, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_is_used_over_reserved() {
        let sample = MemorySample {
            used_bytes: 3 * 1024,
            reserved_bytes: 4 * 1024,
        };
        assert_eq!(sample.utilization_percent(), 75.0);
    }

    #[test]
    fn nothing_reserved_is_zero() {
        let sample = MemorySample {
            used_bytes: 10,
            reserved_bytes: 0,
        };
        assert_eq!(sample.utilization_percent(), 0.0);
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let sample = MemorySample {
            used_bytes: u64::MAX / 2,
            reserved_bytes: u64::MAX,
        };
        assert_eq!(sample.utilization_percent(), 49.99);
    }

    #[test]
    fn cpu_load_is_clamped() {
        assert_eq!(cpu_load_from(1_000, 2, Duration::from_millis(100)), 100.0);
        assert_eq!(cpu_load_from(0, 4, Duration::from_millis(100)), 0.0);
        assert_eq!(cpu_load_from(5, 0, Duration::from_millis(100)), 0.0);
        let load = cpu_load_from(1, 10, Duration::from_secs(1));
        assert!((load - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn estimate_uses_source_tasks() {
        let source = SyntheticSource::with_utilization(10);
        let load = estimate_cpu_load(&source, Duration::from_millis(5)).await;
        assert_eq!(load, 0.0);
    }
}
