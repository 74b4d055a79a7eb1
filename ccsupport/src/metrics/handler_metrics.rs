//! Execution metrics (aggregate across all handlers).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for execution metrics, shared by every handler.
#[derive(Clone, Default)]
pub struct HandlerMetricsStorage {
    pub(crate) registrations: Arc<AtomicU64>,
    pub(crate) executes: Arc<AtomicU64>,
    pub(crate) execute_timeouts: Arc<AtomicU64>,
    pub(crate) execute_errors: Arc<AtomicU64>,
    /// COMPLETED/ERROR messages that arrived with no transaction waiting
    pub(crate) late_responses: Arc<AtomicU64>,
}

impl HandlerMetricsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying execution metrics.
#[derive(Clone)]
pub struct HandlerMetrics {
    storage: HandlerMetricsStorage,
}

impl HandlerMetrics {
    pub(crate) fn new(storage: HandlerMetricsStorage) -> Self {
        Self { storage }
    }

    /// Chaincodes that completed registration.
    pub fn registrations_total(&self) -> u64 {
        self.storage.registrations.load(Ordering::Relaxed)
    }

    /// INIT and TRANSACTION requests sent.
    pub fn executes_total(&self) -> u64 {
        self.storage.executes.load(Ordering::Relaxed)
    }

    pub fn execute_timeouts_total(&self) -> u64 {
        self.storage.execute_timeouts.load(Ordering::Relaxed)
    }

    /// Requests that failed for any reason other than a timeout.
    pub fn execute_errors_total(&self) -> u64 {
        self.storage.execute_errors.load(Ordering::Relaxed)
    }

    pub fn late_responses_total(&self) -> u64 {
        self.storage.late_responses.load(Ordering::Relaxed)
    }
}
