//! Preset retry policies for the resource kinds the backend talks to.
//!
//! Each preset fixes the attempt count, base delay and retryable failure
//! classes appropriate to one resource. They are built once at startup and
//! shared; a `RetryError::Exhausted` coming out of a preset is always fatal
//! to the immediate caller and must be surfaced (typically as a server error
//! response), never retried again upstream.

use std::time::Duration;

use super::retry::{RetryConfig, RetryExecutor};
use crate::error::FailureClass;

/// Ready-made retry configurations per resource kind.
pub struct RetryPolicies;

impl RetryPolicies {
    /// Database calls: 3 attempts, 2s base delay, exponential backoff.
    ///
    /// Retries dropped connections and transient operational errors; query
    /// mistakes and constraint violations propagate immediately.
    pub fn database() -> RetryConfig {
        RetryConfig::preset(
            3,
            Duration::from_secs(2),
            &[FailureClass::ConnectionLost, FailureClass::TransientDatabase],
        )
    }

    /// Network calls: 3 attempts, 1s base delay, exponential backoff.
    pub fn network() -> RetryConfig {
        RetryConfig::preset(
            3,
            Duration::from_secs(1),
            &[FailureClass::ConnectionRefused, FailureClass::Timeout, FailureClass::Io],
        )
    }

    /// Filesystem calls: 3 attempts, 500ms base delay, exponential backoff.
    pub fn filesystem() -> RetryConfig {
        RetryConfig::preset(
            3,
            Duration::from_millis(500),
            &[FailureClass::Io, FailureClass::Os, FailureClass::PermissionDenied],
        )
    }

    /// Messaging (SMTP-style) calls: 3 attempts, 2s base delay, exponential
    /// backoff.
    pub fn messaging() -> RetryConfig {
        RetryConfig::preset(
            3,
            Duration::from_secs(2),
            &[FailureClass::Protocol, FailureClass::ConnectionLost, FailureClass::Timeout],
        )
    }
}

/// Ready-made executor for database calls.
pub fn database_retry() -> RetryExecutor {
    RetryExecutor::new(RetryPolicies::database())
}

/// Ready-made executor for network calls.
pub fn network_retry() -> RetryExecutor {
    RetryExecutor::new(RetryPolicies::network())
}

/// Ready-made executor for filesystem calls.
pub fn filesystem_retry() -> RetryExecutor {
    RetryExecutor::new(RetryPolicies::filesystem())
}

/// Ready-made executor for messaging calls.
pub fn messaging_retry() -> RetryExecutor {
    RetryExecutor::new(RetryPolicies::messaging())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_carry_the_documented_parameters() {
        let database = RetryPolicies::database();
        assert_eq!(database.max_attempts(), 3);
        assert_eq!(database.base_delay(), Duration::from_secs(2));

        let network = RetryPolicies::network();
        assert_eq!(network.max_attempts(), 3);
        assert_eq!(network.base_delay(), Duration::from_secs(1));

        let filesystem = RetryPolicies::filesystem();
        assert_eq!(filesystem.max_attempts(), 3);
        assert_eq!(filesystem.base_delay(), Duration::from_millis(500));

        let messaging = RetryPolicies::messaging();
        assert_eq!(messaging.max_attempts(), 3);
        assert_eq!(messaging.base_delay(), Duration::from_secs(2));
    }

    #[test]
    fn preset_delays_follow_the_exponential_schedule() {
        let network = RetryPolicies::network();

        assert_eq!(network.delay_for(1), Duration::from_secs(1));
        assert_eq!(network.delay_for(2), Duration::from_secs(2));
    }
}
