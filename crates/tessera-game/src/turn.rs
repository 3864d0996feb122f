//! The Turn Coordinator: which seat may act, and until when.
//!
//! ```text
//! IDLE ──begin──→ ACTIVE(deadline) ──┬── EndTurn ─────→ IDLE(next seat)
//!                    │   ▲           └── deadline ────→ IDLE(next seat)
//!               hold │   │ resume                         (synthesized EndTurn)
//!                    ▼   │
//!              ACTIVE(deadline ≤ now + grace)
//! ```
//!
//! The coordinator only keeps records. It owns no timers: the session arms
//! them from [`TurnRecord::deadline`] and [`TurnCoordinator::warning_at`].

use std::collections::BTreeMap;
use std::time::Duration;

use tessera_protocol::PlayerId;
use tokio::time::Instant;

use crate::TurnConfig;

/// The active turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub seat: PlayerId,
    pub deadline: Instant,
    pub warned: bool,
    /// The deadline was pulled in because the seat disconnected.
    pub held: bool,
}

/// Turn state of one session.
#[derive(Debug)]
pub struct TurnCoordinator {
    config: TurnConfig,
    order: Vec<PlayerId>,
    current: Option<TurnRecord>,
    skips: BTreeMap<PlayerId, u32>,
}

impl TurnCoordinator {
    /// `order` is the fixed seat order; every skip counter starts at zero.
    pub fn new(config: TurnConfig, order: Vec<PlayerId>) -> Self {
        let skips = order.iter().map(|p| (p.clone(), 0)).collect();
        Self {
            config,
            order,
            current: None,
            skips,
        }
    }

    /// Carries skip counters over from a restored session.
    pub fn with_skips(mut self, skips: impl IntoIterator<Item = (PlayerId, u32)>) -> Self {
        for (seat, count) in skips {
            if let Some(slot) = self.skips.get_mut(&seat) {
                *slot = count;
            }
        }
        self
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn order(&self) -> &[PlayerId] {
        &self.order
    }

    pub fn current(&self) -> Option<&TurnRecord> {
        self.current.as_ref()
    }

    pub fn current_seat(&self) -> Option<&PlayerId> {
        self.current.as_ref().map(|r| &r.seat)
    }

    pub fn is_turn_of(&self, seat: &PlayerId) -> bool {
        self.current_seat() == Some(seat)
    }

    pub fn skips(&self, seat: &PlayerId) -> u32 {
        self.skips.get(seat).copied().unwrap_or(0)
    }

    /// Gives `seat` the turn with a full deadline.
    pub fn begin(&mut self, seat: PlayerId, now: Instant) -> &TurnRecord {
        self.current.insert(TurnRecord {
            seat,
            deadline: now + self.config.timeout,
            warned: false,
            held: false,
        })
    }

    /// Back to IDLE. Returns the turn that was active.
    pub fn end(&mut self) -> Option<TurnRecord> {
        self.current.take()
    }

    /// The active seat lost its connection: pull the deadline in to at most
    /// `disconnect_grace` from now. Returns the new deadline.
    pub fn hold(&mut self, now: Instant) -> Option<Instant> {
        let grace = self.config.disconnect_grace;
        let record = self.current.as_mut()?;
        record.deadline = record.deadline.min(now + grace);
        record.held = true;
        Some(record.deadline)
    }

    /// The active seat is back: a fresh full deadline and a fresh warning.
    pub fn resume(&mut self, now: Instant) -> Option<Instant> {
        let timeout = self.config.timeout;
        let record = self.current.as_mut()?;
        record.deadline = now + timeout;
        record.warned = false;
        record.held = false;
        Some(record.deadline)
    }

    /// Marks the warning as sent. `false` if there is no turn or it was
    /// already sent.
    pub fn mark_warned(&mut self) -> bool {
        match self.current.as_mut() {
            Some(record) if !record.warned => {
                record.warned = true;
                true
            }
            _ => false,
        }
    }

    /// When the warning for the active turn is due, if still unsent.
    pub fn warning_at(&self) -> Option<Instant> {
        let record = self.current.as_ref()?;
        if record.warned {
            return None;
        }
        Some(
            record
                .deadline
                .checked_sub(self.config.warning)
                .unwrap_or(record.deadline),
        )
    }

    /// Time left on the active turn.
    pub fn time_left(&self, now: Instant) -> Duration {
        self.current
            .as_ref()
            .map(|r| r.deadline.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Counts a timed-out turn. Returns the new count.
    pub fn record_skip(&mut self, seat: &PlayerId) -> u32 {
        let count = self.skips.entry(seat.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_skips(&mut self, seat: &PlayerId) {
        if let Some(count) = self.skips.get_mut(seat) {
            *count = 0;
        }
    }

    pub fn skips_exhausted(&self, seat: &PlayerId) -> bool {
        self.skips(seat) >= self.config.max_skips
    }

    /// The first seat after `seat` in seat order, wrapping, for which
    /// `eligible` holds. `seat` itself is considered last.
    pub fn next_after(
        &self,
        seat: &PlayerId,
        eligible: impl Fn(&PlayerId) -> bool,
    ) -> Option<PlayerId> {
        let start = self
            .order
            .iter()
            .position(|p| p == seat)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.scan_from(start, eligible)
    }

    /// Like [`next_after`](Self::next_after) but `seat` is considered first.
    pub fn first_from(
        &self,
        seat: &PlayerId,
        eligible: impl Fn(&PlayerId) -> bool,
    ) -> Option<PlayerId> {
        let start = self.order.iter().position(|p| p == seat).unwrap_or(0);
        self.scan_from(start, eligible)
    }

    fn scan_from(
        &self,
        start: usize,
        eligible: impl Fn(&PlayerId) -> bool,
    ) -> Option<PlayerId> {
        let n = self.order.len();
        (0..n)
            .map(|i| &self.order[(start + i) % n])
            .find(|p| eligible(p))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn coordinator() -> TurnCoordinator {
        TurnCoordinator::new(
            TurnConfig::default(),
            vec![pid("a"), pid("b"), pid("c")],
        )
    }

    #[test]
    fn test_begin_sets_full_deadline() {
        let mut turns = coordinator();
        let now = Instant::now();
        let record = turns.begin(pid("a"), now).clone();
        assert_eq!(record.deadline, now + Duration::from_secs(60));
        assert!(!record.warned);
        assert!(turns.is_turn_of(&pid("a")));
        assert_eq!(
            turns.warning_at(),
            Some(now + Duration::from_secs(50))
        );
    }

    #[test]
    fn test_hold_pulls_deadline_in_but_never_out() {
        let mut turns = coordinator();
        let start = Instant::now();
        turns.begin(pid("a"), start);

        // 10s in: 50s left, grace is 30s
        let held = turns.hold(start + Duration::from_secs(10)).unwrap();
        assert_eq!(held, start + Duration::from_secs(40));

        // 45s in: only 15s left, grace would push it out
        turns.begin(pid("a"), start);
        let held = turns.hold(start + Duration::from_secs(45)).unwrap();
        assert_eq!(held, start + Duration::from_secs(60));
        assert!(turns.current().unwrap().held);
    }

    #[test]
    fn test_resume_restores_full_deadline_and_rearms_warning() {
        let mut turns = coordinator();
        let start = Instant::now();
        turns.begin(pid("a"), start);
        assert!(turns.mark_warned());
        assert!(!turns.mark_warned());
        assert_eq!(turns.warning_at(), None);

        let later = start + Duration::from_secs(55);
        turns.hold(later);
        let deadline = turns.resume(later).unwrap();
        assert_eq!(deadline, later + Duration::from_secs(60));
        assert!(turns.warning_at().is_some());
        assert!(!turns.current().unwrap().held);
    }

    #[test]
    fn test_next_after_wraps_and_skips_ineligible() {
        let turns = coordinator();
        assert_eq!(turns.next_after(&pid("a"), |_| true), Some(pid("b")));
        assert_eq!(turns.next_after(&pid("c"), |_| true), Some(pid("a")));
        assert_eq!(
            turns.next_after(&pid("a"), |p| p != &pid("b")),
            Some(pid("c"))
        );
        // only the current seat is left
        assert_eq!(
            turns.next_after(&pid("a"), |p| p == &pid("a")),
            Some(pid("a"))
        );
        assert_eq!(turns.next_after(&pid("a"), |_| false), None);
    }

    #[test]
    fn test_first_from_considers_seat_itself_first() {
        let turns = coordinator();
        assert_eq!(turns.first_from(&pid("b"), |_| true), Some(pid("b")));
        assert_eq!(
            turns.first_from(&pid("b"), |p| p != &pid("b")),
            Some(pid("c"))
        );
    }

    #[test]
    fn test_skips_count_reset_and_exhaust() {
        let mut turns = coordinator();
        assert_eq!(turns.record_skip(&pid("b")), 1);
        assert!(!turns.skips_exhausted(&pid("b")));
        turns.reset_skips(&pid("b"));
        assert_eq!(turns.skips(&pid("b")), 0);
        turns.record_skip(&pid("b"));
        turns.record_skip(&pid("b"));
        assert!(turns.skips_exhausted(&pid("b")));
    }

    #[test]
    fn test_with_skips_ignores_unknown_seats() {
        let turns = coordinator().with_skips([(pid("a"), 1), (pid("zz"), 4)]);
        assert_eq!(turns.skips(&pid("a")), 1);
        assert_eq!(turns.skips(&pid("zz")), 0);
    }
}
