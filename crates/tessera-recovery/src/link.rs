//! Per-seat link state and recovery settings.

use std::time::Duration;

use tessera_protocol::{PlayerId, SeatStatus};

/// How long and how often a lost seat is held open.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Attempts before the seat is marked failed.
    pub max_attempts: u32,
    /// Attempt `n` (1-based) waits `backoff_base * n`.
    pub backoff_base: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
        }
    }
}

impl RecoveryConfig {
    /// Wait before attempt `attempt` (1-based) is spent.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt.max(1)
    }

    /// Total time a seat is held after its connection drops.
    pub fn window(&self) -> Duration {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

/// Where a seat stands with respect to its connection.
///
/// ```text
///   Connected ──→ Disconnected ──→ Reconnected ──→ Disconnected ...
///                      │
///                      └──→ Failed
///   any live state ──→ Left | Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    /// Held open; `attempts` recovery attempts have been spent.
    Disconnected { attempts: u32 },
    Reconnected,
    Failed,
    Left,
    Removed,
}

impl LinkState {
    /// Whether the seat still has a live connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }

    /// Whether the seat still counts as a participant.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Reconnected | Self::Disconnected { .. }
        )
    }

    pub fn status(&self) -> SeatStatus {
        match self {
            Self::Connected => SeatStatus::Connected,
            Self::Disconnected { .. } => SeatStatus::Disconnected,
            Self::Reconnected => SeatStatus::Reconnected,
            Self::Failed => SeatStatus::Failed,
            Self::Left => SeatStatus::Left,
            Self::Removed => SeatStatus::Removed,
        }
    }
}

/// One seat's link record.
#[derive(Debug, Clone)]
pub struct SeatLink {
    pub player_id: PlayerId,
    pub state: LinkState,
    /// Secret the seat presents to reclaim itself on a new connection.
    /// Stable for the life of the session.
    pub token: String,
}
