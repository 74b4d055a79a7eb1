//! Metrics collection for the chaincode broker.
//!
//! Two groups, both lock-free `AtomicU64` counters behind cloneable handles:
//! - **LaunchMetrics**: launches, failures, timeouts and cumulative duration
//! - **HandlerMetrics**: registrations, executes, execute timeouts/errors and
//!   late responses
//!
//! All counters are monotonic. Delta calculation is the caller's responsibility.

mod handler_metrics;
mod launch_metrics;

pub use handler_metrics::{HandlerMetrics, HandlerMetricsStorage};
pub use launch_metrics::{LaunchMetrics, LaunchMetricsStorage};
