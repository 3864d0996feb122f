//! Client-side score tracking.
//!
//! The client keeps a running total per seat from `SCORE_UPDATE` events so
//! the UI can show scores without waiting for the next sync. The periodic
//! `SCORE_SYNC` is the check: a seat off by more than the tolerance is
//! repaired from the server's history.

use std::collections::BTreeMap;

use tessera_protocol::{PlayerId, ScoreCheckpoint, ScoreEvent, ScoreVector};

/// A seat whose local total disagrees with the server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub player_id: PlayerId,
    pub local: i32,
    pub authoritative: i32,
}

/// Incrementally tracked scores of one session.
#[derive(Debug, Clone, Default)]
pub struct ScoreTracker {
    totals: BTreeMap<PlayerId, i32>,
    history: BTreeMap<PlayerId, Vec<ScoreEvent>>,
    /// Highest event sequence applied.
    last_seq: u64,
    tolerance: i32,
}

impl ScoreTracker {
    pub fn new(tolerance: i32) -> Self {
        Self {
            tolerance: tolerance.max(0),
            ..Self::default()
        }
    }

    pub fn totals(&self) -> &BTreeMap<PlayerId, i32> {
        &self.totals
    }

    pub fn total(&self, player_id: &PlayerId) -> i32 {
        self.totals.get(player_id).copied().unwrap_or(0)
    }

    pub fn history(&self, player_id: &PlayerId) -> &[ScoreEvent] {
        self.history.get(player_id).map_or(&[], Vec::as_slice)
    }

    /// Applies one `SCORE_UPDATE`. Events already applied are skipped.
    pub fn apply(&mut self, event: &ScoreEvent) {
        if event.seq <= self.last_seq {
            return;
        }
        self.last_seq = event.seq;
        *self.totals.entry(event.player_id.clone()).or_default() += event.delta;
        self.history
            .entry(event.player_id.clone())
            .or_default()
            .push(event.clone());
    }

    /// Seats whose local total is further than the tolerance from the
    /// authoritative vector.
    pub fn drift(&self, authoritative: &ScoreVector) -> Vec<Drift> {
        authoritative
            .scores
            .iter()
            .filter_map(|(player_id, &score)| {
                let local = self.total(player_id);
                ((local - score).abs() > self.tolerance).then(|| Drift {
                    player_id: player_id.clone(),
                    local,
                    authoritative: score,
                })
            })
            .collect()
    }

    /// Takes the server's total for a seat without its history.
    pub fn adopt(&mut self, player_id: &PlayerId, total: i32) {
        self.totals.insert(player_id.clone(), total);
    }

    /// Replaces a seat's history wholesale with the server's answer to a
    /// reconciliation request.
    pub fn replace(
        &mut self,
        player_id: &PlayerId,
        checkpoint: ScoreCheckpoint,
        events: Vec<ScoreEvent>,
    ) {
        let total = events.last().map_or(checkpoint.total, |e| e.total);
        let seq = events.last().map_or(checkpoint.seq, |e| e.seq);
        self.last_seq = self.last_seq.max(seq);
        self.totals.insert(player_id.clone(), total);
        self.history.insert(player_id.clone(), events);
    }

    /// Forgets everything, e.g. when a new session starts.
    pub fn clear(&mut self) {
        self.totals.clear();
        self.history.clear();
        self.last_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use tessera_protocol::ScoreKind;

    use super::*;

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn event(seq: u64, who: &str, delta: i32, total: i32) -> ScoreEvent {
        ScoreEvent {
            seq,
            player_id: pid(who),
            delta,
            total,
            kind: ScoreKind::TilePlacement,
            reason: "placed".into(),
            version: seq,
        }
    }

    fn vector(entries: &[(&str, i32)]) -> ScoreVector {
        ScoreVector {
            version: 1,
            scores: entries.iter().map(|(p, s)| (pid(p), *s)).collect(),
        }
    }

    #[test]
    fn test_updates_accumulate_and_duplicates_are_skipped() {
        let mut tracker = ScoreTracker::new(5);
        tracker.apply(&event(1, "ana", 3, 3));
        tracker.apply(&event(2, "ana", 2, 5));
        tracker.apply(&event(2, "ana", 2, 5));
        tracker.apply(&event(3, "ben", 1, 1));

        assert_eq!(tracker.total(&pid("ana")), 5);
        assert_eq!(tracker.total(&pid("ben")), 1);
        assert_eq!(tracker.history(&pid("ana")).len(), 2);
    }

    #[test]
    fn test_drift_within_tolerance_is_ignored() {
        let mut tracker = ScoreTracker::new(5);
        tracker.apply(&event(1, "ana", 3, 3));
        assert!(tracker.drift(&vector(&[("ana", 8), ("ben", 0)])).is_empty());

        let drift = tracker.drift(&vector(&[("ana", 9), ("ben", 0)]));
        assert_eq!(
            drift,
            vec![Drift {
                player_id: pid("ana"),
                local: 3,
                authoritative: 9,
            }]
        );
    }

    #[test]
    fn test_replace_takes_history_wholesale() {
        let mut tracker = ScoreTracker::new(0);
        tracker.apply(&event(1, "ana", 3, 3));
        tracker.replace(
            &pid("ana"),
            ScoreCheckpoint { seq: 4, total: 10 },
            vec![event(6, "ana", -2, 8)],
        );
        assert_eq!(tracker.total(&pid("ana")), 8);
        assert_eq!(tracker.history(&pid("ana")).len(), 1);

        // an update the reconciliation already covered
        tracker.apply(&event(5, "ana", 2, 10));
        assert_eq!(tracker.total(&pid("ana")), 8);
        assert!(tracker.drift(&vector(&[("ana", 8)])).is_empty());
    }

    #[test]
    fn test_empty_history_falls_back_to_checkpoint() {
        let mut tracker = ScoreTracker::new(0);
        tracker.replace(&pid("ben"), ScoreCheckpoint { seq: 2, total: 7 }, Vec::new());
        assert_eq!(tracker.total(&pid("ben")), 7);
    }
}
