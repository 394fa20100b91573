//! Runtime process-health monitoring.
//!
//! [`sampler`] takes point-in-time snapshots of the current process (memory,
//! CPU, threads, open file descriptors); [`performance`] owns the background
//! sampling loop, the bounded history and the degradation heuristics.
//!
//! The hosting application starts exactly one [`PerformanceMonitor`] from its
//! startup hook and stops it from its shutdown hook; the health-check
//! endpoint reads [`PerformanceMonitor::current_metrics`] and
//! [`PerformanceMonitor::summary`] on demand.

use thiserror::Error;

pub mod performance;
pub mod sampler;

pub use performance::{
    global, init_global, MonitorConfig, MonitorSummary, PerformanceMonitor, StatSummary,
};
pub use sampler::{MetricSample, MetricSampler};

/// Errors raised while constructing monitoring components.
///
/// Per-sample collection failures are never surfaced here: they are recorded
/// in-band as error-carrying [`MetricSample`]s.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The current process id could not be resolved for the metrics source.
    #[error("could not resolve the current process id: {0}")]
    PidUnavailable(String),

    /// [`init_global`] was called after the global monitor was already built.
    #[error("global performance monitor is already initialized")]
    AlreadyInitialized,
}
