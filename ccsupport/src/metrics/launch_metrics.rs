//! Launch metrics (aggregate across all chaincodes).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Storage for launch metrics.
///
/// Owned by the launcher; only originating launches are counted.
#[derive(Clone, Default)]
pub struct LaunchMetricsStorage {
    pub(crate) launches: Arc<AtomicU64>,
    pub(crate) launch_failures: Arc<AtomicU64>,
    pub(crate) launch_timeouts: Arc<AtomicU64>,
    pub(crate) launch_duration_ms: Arc<AtomicU64>,
}

impl LaunchMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_launch(&self, elapsed: Duration, success: bool) {
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.launch_duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if !success {
            self.launch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_timeout(&self) {
        self.launch_timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying launch metrics.
///
/// All counters are monotonic and never reset.
#[derive(Clone)]
pub struct LaunchMetrics {
    storage: LaunchMetricsStorage,
}

impl LaunchMetrics {
    pub(crate) fn new(storage: LaunchMetricsStorage) -> Self {
        Self { storage }
    }

    /// Launches started by this broker, successful or not.
    pub fn launches_total(&self) -> u64 {
        self.storage.launches.load(Ordering::Relaxed)
    }

    /// Launches that ended in an error, timeouts included.
    pub fn launch_failures_total(&self) -> u64 {
        self.storage.launch_failures.load(Ordering::Relaxed)
    }

    pub fn launch_timeouts_total(&self) -> u64 {
        self.storage.launch_timeouts.load(Ordering::Relaxed)
    }

    /// Sum of all launch durations, in milliseconds.
    pub fn launch_duration_ms_total(&self) -> u64 {
        self.storage.launch_duration_ms.load(Ordering::Relaxed)
    }
}
