//! Score Reconciler: the periodic, authoritative `SCORE_SYNC`.
//!
//! Scores are recomputed here, from the last published record, outside the
//! session actor. The actor only compares the result against its ledger,
//! and only if the session has not moved on in the meantime.

use std::sync::Arc;

use tessera_protocol::Phase;
use tessera_timer::Cadence;
use tracing::debug;

use crate::{RuleEngine, SessionHandle};

pub(crate) struct ScoreReconciler<R: RuleEngine> {
    rules: Arc<R>,
    session: SessionHandle<R>,
    cadence: Cadence,
}

impl<R: RuleEngine> ScoreReconciler<R> {
    pub(crate) fn new(rules: Arc<R>, session: SessionHandle<R>, cadence: Cadence) -> Self {
        Self {
            rules,
            session,
            cadence,
        }
    }

    pub(crate) async fn run(mut self) {
        let session_id = self.session.session_id();
        let mut record = self.session.subscribe();
        loop {
            tokio::select! {
                _ = self.cadence.tick() => {}
                changed = record.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let observed = record.borrow_and_update().clone();
            if observed.view.phase == Phase::GameEnd {
                break;
            }
            let recomputed = self.rules.compute_score(&observed.view.board);
            if self
                .session
                .publish_scores(observed.view.version, recomputed)
                .await
                .is_err()
            {
                break;
            }
        }
        debug!(%session_id, "score reconciler stopped");
    }
}
