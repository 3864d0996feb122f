//! The score ledger: the published [`ScoreVector`] plus each seat's history
//! of score events since its last checkpoint.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tessera_protocol::{PlayerId, ScoreCheckpoint, ScoreEvent, ScoreKind, ScoreVector};

use crate::ScoreDelta;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SeatHistory {
    checkpoint: ScoreCheckpoint,
    events: VecDeque<ScoreEvent>,
}

impl SeatHistory {
    fn total(&self) -> i32 {
        self.events
            .back()
            .map(|e| e.total)
            .unwrap_or(self.checkpoint.total)
    }
}

/// Scores of one session.
///
/// Totals in the vector always equal the rule engine's recomputed scores:
/// whenever the events reported for a move do not add up, an
/// [`ScoreKind::Adjustment`] event closes the gap. Replaying a seat's
/// checkpoint plus its events therefore always lands on its published score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreLedger {
    seq: u64,
    vector: ScoreVector,
    seats: BTreeMap<PlayerId, SeatHistory>,
    history_limit: usize,
}

impl ScoreLedger {
    pub fn new(seats: &[PlayerId], history_limit: usize) -> Self {
        Self {
            seq: 0,
            vector: ScoreVector {
                version: 0,
                scores: seats.iter().map(|p| (p.clone(), 0)).collect(),
            },
            seats: seats
                .iter()
                .map(|p| (p.clone(), SeatHistory::default()))
                .collect(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn vector(&self) -> &ScoreVector {
        &self.vector
    }

    /// Records the events of one accepted move at session `version`, then
    /// squares every seat with `recomputed`. Returns the events in order.
    pub fn record(
        &mut self,
        version: u64,
        deltas: Vec<ScoreDelta>,
        recomputed: &BTreeMap<PlayerId, i32>,
    ) -> Vec<ScoreEvent> {
        let mut events = Vec::new();
        for delta in deltas {
            if delta.delta == 0 || !self.seats.contains_key(&delta.player_id) {
                continue;
            }
            events.push(self.push(version, delta));
        }
        events.extend(self.repair(version, recomputed));
        events
    }

    /// Appends an adjustment for every seat whose total disagrees with
    /// `recomputed`. Returns the adjustments; none if everything matches.
    pub fn repair(
        &mut self,
        version: u64,
        recomputed: &BTreeMap<PlayerId, i32>,
    ) -> Vec<ScoreEvent> {
        let gaps: Vec<(PlayerId, i32)> = self
            .seats
            .iter()
            .filter_map(|(player_id, history)| {
                let want = recomputed.get(player_id).copied().unwrap_or(0);
                let gap = want - history.total();
                (gap != 0).then(|| (player_id.clone(), gap))
            })
            .collect();

        gaps.into_iter()
            .map(|(player_id, gap)| {
                let delta = ScoreDelta::new(
                    player_id,
                    gap,
                    ScoreKind::Adjustment,
                    "recomputed score",
                );
                self.push(version, delta)
            })
            .collect()
    }

    /// Whether `recomputed` matches what is published.
    pub fn matches(&self, recomputed: &BTreeMap<PlayerId, i32>) -> bool {
        self.seats.keys().all(|p| {
            recomputed.get(p).copied().unwrap_or(0) == self.vector.score(p)
        })
    }

    /// Settles every seat's history into its checkpoint. Called at round
    /// boundaries.
    pub fn checkpoint(&mut self) {
        for history in self.seats.values_mut() {
            if let Some(last) = history.events.back() {
                history.checkpoint = ScoreCheckpoint {
                    seq: last.seq,
                    total: last.total,
                };
            }
            history.events.clear();
        }
    }

    /// A seat's checkpoint and the events after it, oldest first.
    pub fn history(&self, player_id: &PlayerId) -> Option<(ScoreCheckpoint, Vec<ScoreEvent>)> {
        self.seats
            .get(player_id)
            .map(|h| (h.checkpoint, h.events.iter().cloned().collect()))
    }

    fn push(&mut self, version: u64, delta: ScoreDelta) -> ScoreEvent {
        self.seq += 1;
        let limit = self.history_limit;
        let history = self.seats.entry(delta.player_id.clone()).or_default();
        let total = history.total() + delta.delta;
        let event = ScoreEvent {
            seq: self.seq,
            player_id: delta.player_id,
            delta: delta.delta,
            total,
            kind: delta.kind,
            reason: delta.reason,
            version,
        };

        history.events.push_back(event.clone());
        while history.events.len() > limit {
            if let Some(old) = history.events.pop_front() {
                history.checkpoint = ScoreCheckpoint {
                    seq: old.seq,
                    total: old.total,
                };
            }
        }

        self.vector.scores.insert(event.player_id.clone(), total);
        self.vector.version += 1;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn scores(pairs: &[(&str, i32)]) -> BTreeMap<PlayerId, i32> {
        pairs.iter().map(|(p, s)| (pid(p), *s)).collect()
    }

    fn placement(p: &str, delta: i32) -> ScoreDelta {
        ScoreDelta::new(pid(p), delta, ScoreKind::TilePlacement, "wall tile")
    }

    #[test]
    fn test_record_builds_running_totals() {
        let mut ledger = ScoreLedger::new(&[pid("a"), pid("b")], 16);
        let events = ledger.record(
            1,
            vec![placement("a", 3), placement("a", 2), placement("b", 1)],
            &scores(&[("a", 5), ("b", 1)]),
        );
        let totals: Vec<(u64, i32)> = events.iter().map(|e| (e.seq, e.total)).collect();
        assert_eq!(totals, [(1, 3), (2, 5), (3, 1)]);
        assert_eq!(ledger.vector().score(&pid("a")), 5);
        assert_eq!(ledger.vector().version, 3);
    }

    #[test]
    fn test_mismatch_appends_adjustment() {
        let mut ledger = ScoreLedger::new(&[pid("a"), pid("b")], 16);
        let events = ledger.record(1, vec![placement("a", 3)], &scores(&[("a", 1), ("b", 0)]));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, ScoreKind::Adjustment);
        assert_eq!(events[1].delta, -2);
        assert_eq!(ledger.vector().score(&pid("a")), 1);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mut ledger = ScoreLedger::new(&[pid("a")], 16);
        ledger.record(1, vec![placement("a", 4)], &scores(&[("a", 4)]));
        let before = ledger.vector().clone();
        assert!(ledger.repair(2, &scores(&[("a", 4)])).is_empty());
        assert!(ledger.repair(2, &scores(&[("a", 4)])).is_empty());
        assert_eq!(ledger.vector(), &before);
    }

    #[test]
    fn test_checkpoint_clears_history() {
        let mut ledger = ScoreLedger::new(&[pid("a")], 16);
        ledger.record(1, vec![placement("a", 4)], &scores(&[("a", 4)]));
        ledger.checkpoint();
        ledger.record(2, vec![placement("a", -1)], &scores(&[("a", 3)]));

        let (checkpoint, events) = ledger.history(&pid("a")).unwrap();
        assert_eq!(checkpoint, ScoreCheckpoint { seq: 1, total: 4 });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].total, 3);
    }

    #[test]
    fn test_history_limit_folds_oldest_into_checkpoint() {
        let mut ledger = ScoreLedger::new(&[pid("a")], 2);
        for (v, total) in [(1, 1), (2, 2), (3, 3)] {
            ledger.record(v, vec![placement("a", 1)], &scores(&[("a", total)]));
        }
        let (checkpoint, events) = ledger.history(&pid("a")).unwrap();
        assert_eq!(checkpoint, ScoreCheckpoint { seq: 1, total: 1 });
        assert_eq!(events.len(), 2);
        let replayed = checkpoint.total + events.iter().map(|e| e.delta).sum::<i32>();
        assert_eq!(replayed, ledger.vector().score(&pid("a")));
    }

    #[test]
    fn test_zero_deltas_are_dropped() {
        let mut ledger = ScoreLedger::new(&[pid("a")], 16);
        let events = ledger.record(1, vec![placement("a", 0)], &scores(&[("a", 0)]));
        assert!(events.is_empty());
        assert_eq!(ledger.vector().version, 0);
    }
}
