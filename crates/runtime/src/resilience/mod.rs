//! Resilient operation execution.
//!
//! The [`mod@retry`] module provides a generic bounded-attempt retry engine that
//! works over both blocking and async call sites; [`policies`] supplies the
//! ready-made configurations used throughout the application (database,
//! network, filesystem, messaging).
//!
//! The engine is stateless and reentrant: one [`RetryExecutor`] built at
//! startup can be shared across all calls. Attempts of a single call are
//! strictly sequential; attempts of concurrent calls interleave freely.

pub mod policies;
pub mod retry;

pub use policies::{
    database_retry, filesystem_retry, messaging_retry, network_retry, RetryPolicies,
};
pub use retry::{
    retry, retry_blocking, Backoff, ConfigError, OnRetry, RetryCondition, RetryConfig,
    RetryConfigBuilder, RetryError, RetryExecutor, RetryResult,
};
