//! Fixed-interval liveness probing.
//!
//! The heartbeat runs on its own cadence, independent of typed traffic.
//! Each tick the owner asks [`Heartbeat::check`] whether the peer has been
//! silent for too long; if not, it sends a probe.
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         frame = conn.recv() => { /* dispatch */ }
//!         _ = heartbeat.tick() => match heartbeat.check(conn.last_activity()) {
//!             Pulse::Probe => conn.ping().await?,
//!             Pulse::Lost { silent_for } => break,
//!         },
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between probes.
    pub interval: Duration,
    /// Consecutive silent intervals tolerated before the peer is lost.
    pub missed_limit: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            missed_limit: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Silence longer than this means the connection is lost.
    pub fn lost_after(&self) -> Duration {
        self.interval.saturating_mul(self.missed_limit.max(1))
    }
}

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// The peer is alive; send another probe.
    Probe,
    /// The peer has been silent past the limit.
    Lost { silent_for: Duration },
}

/// Drives the probe cadence for a single connection.
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Interval,
}

impl Heartbeat {
    /// Creates a heartbeat whose first tick fires one interval from now.
    pub fn new(config: HeartbeatConfig) -> Self {
        let mut interval =
            time::interval_at(Instant::now() + config.interval, config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { config, interval }
    }

    /// Waits for the next probe slot. Cancel-safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Classifies the connection given its most recent inbound activity.
    pub fn check(&self, last_activity: Instant) -> Pulse {
        let silent_for = last_activity.elapsed();
        if silent_for >= self.config.lost_after() {
            Pulse::Lost { silent_for }
        } else {
            Pulse::Probe
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }
}
