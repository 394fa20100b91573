//! Runtime infrastructure shared by the Casedesk backend.
//!
//! Two independent halves live here:
//!
//! - [`resilience`]: a generic retry engine with bounded attempts,
//!   exponential/jittered backoff and a typed failure classification, plus
//!   preset policies for database, network, filesystem and messaging calls.
//! - [`monitor`]: a background process-health sampler that keeps a bounded
//!   history of memory/CPU samples, warns on configured limits and raises a
//!   heuristic memory-leak signal.
//!
//! The request-handling layers of the application wrap their fallible calls
//! with the preset retry policies; the application lifecycle starts and stops
//! one [`monitor::PerformanceMonitor`] for the whole process.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod collections;
pub mod error;
pub mod monitor;
pub mod resilience;

// Re-export commonly used types for convenience
pub use error::{Classify, FailureClass};
pub use monitor::{
    MetricSample, MetricSampler, MonitorConfig, MonitorError, MonitorSummary, PerformanceMonitor,
    StatSummary,
};
pub use resilience::{
    database_retry, filesystem_retry, messaging_retry, network_retry, retry, retry_blocking,
    Backoff, RetryConfig, RetryConfigBuilder, RetryCondition, RetryError, RetryExecutor,
    RetryPolicies, RetryResult,
};
