//! Bounded connect retry policy.

use std::time::Duration;

/// How a client dials the server.
///
/// Attempt `n` (1-based) that fails is followed by a pause of
/// `backoff_base * n` before attempt `n + 1`. After `max_attempts` failures
/// the caller surfaces [`TransportError::ConnectionFailed`](crate::TransportError::ConnectionFailed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Upper bound on a single attempt, including the WebSocket upgrade.
    pub connect_timeout: Duration,
    /// Total number of attempts, at least 1.
    pub max_attempts: u32,
    /// Linear backoff step.
    pub backoff_base: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl ConnectPolicy {
    /// Pause after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.max(1))
    }

    /// Attempts actually made, treating 0 as 1.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
