//! Per-session snapshot writer.
//!
//! Runs beside the session actor and saves the records it publishes, so
//! disk I/O never sits on the gameplay path. Saves come from three places:
//! the auto-save cadence (only when something changed since the last
//! save), effects such as a disconnect, and explicit requests.

use std::sync::Arc;

use serde::Serialize;
use tessera_protocol::SessionId;
use tessera_snapshot::{FileSnapshotStore, SnapshotError, SnapshotMeta, SnapshotTrigger};
use tessera_timer::Cadence;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::SessionRecord;

pub(crate) enum PersistRequest {
    Save {
        trigger: SnapshotTrigger,
        reply: Option<oneshot::Sender<Result<SnapshotMeta, SnapshotError>>>,
    },
    /// The session is over: delete its snapshots and stop.
    Discard,
}

pub(crate) struct Snapshotter<S> {
    session_id: SessionId,
    store: Arc<FileSnapshotStore>,
    record: watch::Receiver<Arc<SessionRecord<S>>>,
    requests: mpsc::UnboundedReceiver<PersistRequest>,
    cadence: Cadence,
    /// The published record differs from the last one saved.
    dirty: bool,
}

impl<S: Serialize + Send + Sync + 'static> Snapshotter<S> {
    pub(crate) fn new(
        session_id: SessionId,
        store: Arc<FileSnapshotStore>,
        record: watch::Receiver<Arc<SessionRecord<S>>>,
        requests: mpsc::UnboundedReceiver<PersistRequest>,
        cadence: Cadence,
    ) -> Self {
        Self {
            session_id,
            store,
            record,
            requests,
            cadence,
            dirty: true,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(session_id = %self.session_id, "snapshot writer started");
        loop {
            tokio::select! {
                biased;

                req = self.requests.recv() => match req {
                    Some(req) => {
                        if !self.handle(req).await {
                            return;
                        }
                    }
                    None => break,
                },
                changed = self.record.changed() => {
                    if changed.is_err() {
                        // the actor is gone; finish what it asked for
                        while let Ok(req) = self.requests.try_recv() {
                            if !self.handle(req).await {
                                return;
                            }
                        }
                        break;
                    }
                    self.dirty = true;
                }
                _ = self.cadence.tick() => {
                    if self.dirty {
                        // a failed save stays dirty and is retried next tick
                        if let Err(e) = self.save(SnapshotTrigger::Auto).await {
                            warn!(session_id = %self.session_id, error = %e, "auto-save failed");
                        }
                    }
                }
            }
        }
        debug!(session_id = %self.session_id, "snapshot writer stopped");
    }

    /// Returns `false` once the writer should stop.
    async fn handle(&mut self, req: PersistRequest) -> bool {
        match req {
            PersistRequest::Save { trigger, reply } => {
                let result = self.save(trigger).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(session_id = %self.session_id, %trigger, error = %e, "snapshot failed");
                        }
                    }
                }
                true
            }
            PersistRequest::Discard => {
                match self.store.discard(self.session_id).await {
                    Ok(removed) => {
                        info!(session_id = %self.session_id, removed, "snapshots discarded")
                    }
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "failed to discard snapshots")
                    }
                }
                false
            }
        }
    }

    async fn save(&mut self, trigger: SnapshotTrigger) -> Result<SnapshotMeta, SnapshotError> {
        let record = self.record.borrow_and_update().clone();
        let meta = self
            .store
            .save(self.session_id, trigger, record.view.version, &*record)
            .await?;
        self.dirty = false;
        self.cadence.reset();
        Ok(meta)
    }
}
