//! The file-backed snapshot store.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tessera_protocol::SessionId;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::SnapshotError;

const STAGING_SUFFIX: &str = ".tmp";

/// What caused a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotTrigger {
    /// The periodic auto-save.
    Auto,
    /// Someone asked for one.
    Manual,
    /// A seat lost its connection.
    Disconnect,
    /// The server is stopping.
    Shutdown,
}

impl fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Disconnect => "disconnect",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// An immutable, point-in-time copy of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub snapshot_id: u64,
    pub session_id: SessionId,
    /// Wall-clock milliseconds since the Unix epoch.
    pub taken_at_ms: u64,
    pub trigger: SnapshotTrigger,
    /// Session version captured.
    pub version: u64,
    pub state: S,
}

/// What a successful save wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub snapshot_id: u64,
    pub session_id: SessionId,
    pub trigger: SnapshotTrigger,
    pub version: u64,
    pub path: PathBuf,
}

/// Where snapshots live and how many are kept.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Live snapshots.
    pub save_dir: PathBuf,
    /// Staging area. Must be on the same filesystem as `save_dir` so the
    /// final rename is atomic.
    pub temp_dir: PathBuf,
    /// Snapshots kept per session.
    pub retain: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("game_saves"),
            temp_dir: PathBuf::from("temp_saves"),
            retain: 5,
        }
    }
}

/// Snapshots as files, one per snapshot.
///
/// Snapshot ids come from one counter per store, seeded past the highest id
/// already on disk, so ids only grow across restarts. `save` takes `&self`;
/// the store is shared behind an `Arc` by every session's writer.
#[derive(Debug)]
pub struct FileSnapshotStore {
    config: SnapshotConfig,
    next_id: AtomicU64,
}

impl FileSnapshotStore {
    /// Prepares both directories, discards staged files left by an
    /// interrupted write, and seeds the id counter.
    pub async fn open(config: SnapshotConfig) -> Result<Self, SnapshotError> {
        fs::create_dir_all(&config.save_dir).await?;
        fs::create_dir_all(&config.temp_dir).await?;

        let mut staged = fs::read_dir(&config.temp_dir).await?;
        while let Some(entry) = staged.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX) {
                debug!(path = %entry.path().display(), "discarding staged snapshot");
                let _ = fs::remove_file(entry.path()).await;
            }
        }

        let store = Self {
            config,
            next_id: AtomicU64::new(1),
        };
        let highest = store
            .entries()
            .await?
            .iter()
            .map(|(_, id, _)| *id)
            .max()
            .unwrap_or(0);
        store.next_id.store(highest + 1, Ordering::SeqCst);

        info!(
            dir = %store.config.save_dir.display(),
            next_id = highest + 1,
            "snapshot store opened"
        );
        Ok(store)
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Writes a snapshot of `state` and prunes the session's oldest
    /// snapshots past the retention count.
    ///
    /// # Errors
    /// [`SnapshotError::Encode`] or [`SnapshotError::Io`]. Nothing partial is
    /// ever left in the save directory.
    pub async fn save<S: Serialize>(
        &self,
        session_id: SessionId,
        trigger: SnapshotTrigger,
        version: u64,
        state: &S,
    ) -> Result<SnapshotMeta, SnapshotError> {
        let snapshot_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = Snapshot {
            snapshot_id,
            session_id,
            taken_at_ms: unix_millis(),
            trigger,
            version,
            state,
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(SnapshotError::Encode)?;

        let name = file_name(session_id, snapshot_id);
        let staged = self
            .config
            .temp_dir
            .join(format!("{name}{STAGING_SUFFIX}"));
        let path = self.config.save_dir.join(&name);

        if let Err(e) = write_staged(&staged, &bytes).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&staged, &path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }

        debug!(%session_id, snapshot_id, %trigger, version, "snapshot saved");

        if let Err(e) = self.prune(session_id).await {
            warn!(%session_id, error = %e, "failed to prune old snapshots");
        }

        Ok(SnapshotMeta {
            snapshot_id,
            session_id,
            trigger,
            version,
            path,
        })
    }

    /// The newest readable snapshot of a session.
    ///
    /// Files that fail to read or decode are skipped with a warning, so a
    /// damaged newest file falls back to the one before it.
    pub async fn load_latest<S: DeserializeOwned>(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Snapshot<S>>, SnapshotError> {
        let mut candidates = self.session_entries(session_id).await?;
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (snapshot_id, path) in candidates {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%session_id, snapshot_id, error = %e, "unreadable snapshot skipped");
                    continue;
                }
            };
            match serde_json::from_slice::<Snapshot<S>>(&bytes) {
                Ok(snapshot) if snapshot.session_id == session_id => {
                    return Ok(Some(snapshot));
                }
                Ok(_) => {
                    warn!(%session_id, snapshot_id, "snapshot belongs to another session, skipped");
                }
                Err(source) => {
                    let e = SnapshotError::Decode { path, source };
                    warn!(%session_id, snapshot_id, error = %e, "corrupt snapshot skipped");
                }
            }
        }
        Ok(None)
    }

    /// Snapshot ids on disk for a session, oldest first.
    pub async fn list(&self, session_id: SessionId) -> Result<Vec<u64>, SnapshotError> {
        let mut ids: Vec<u64> = self
            .session_entries(session_id)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Every session with at least one snapshot on disk.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>, SnapshotError> {
        let mut sessions: Vec<SessionId> =
            self.entries().await?.into_iter().map(|(s, _, _)| s).collect();
        sessions.sort_unstable();
        sessions.dedup();
        Ok(sessions)
    }

    /// Deletes every snapshot of a session. Returns how many were removed.
    pub async fn discard(&self, session_id: SessionId) -> Result<usize, SnapshotError> {
        let entries = self.session_entries(session_id).await?;
        for (_, path) in &entries {
            fs::remove_file(path).await?;
        }
        if !entries.is_empty() {
            info!(%session_id, removed = entries.len(), "snapshots discarded");
        }
        Ok(entries.len())
    }

    async fn prune(&self, session_id: SessionId) -> Result<usize, SnapshotError> {
        let mut entries = self.session_entries(session_id).await?;
        if entries.len() <= self.config.retain {
            return Ok(0);
        }
        entries.sort_by_key(|(id, _)| *id);
        let excess = entries.len() - self.config.retain;
        for (snapshot_id, path) in entries.into_iter().take(excess) {
            fs::remove_file(&path).await?;
            debug!(%session_id, snapshot_id, "old snapshot pruned");
        }
        Ok(excess)
    }

    async fn session_entries(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|(s, _, _)| *s == session_id)
            .map(|(_, id, path)| (id, path))
            .collect())
    }

    /// Every well-named file in the save directory.
    async fn entries(&self) -> Result<Vec<(SessionId, u64, PathBuf)>, SnapshotError> {
        let mut found = Vec::new();
        let mut dir = fs::read_dir(&self.config.save_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if let Some((session_id, snapshot_id)) = parse_name(&name.to_string_lossy()) {
                found.push((session_id, snapshot_id, entry.path()));
            }
        }
        Ok(found)
    }
}

async fn write_staged(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Zero-padded so lexical and numeric order agree.
fn file_name(session_id: SessionId, snapshot_id: u64) -> String {
    format!("{}_{:020}", session_id.0, snapshot_id)
}

fn parse_name(name: &str) -> Option<(SessionId, u64)> {
    let (session, snapshot) = name.split_once('_')?;
    Some((SessionId(session.parse().ok()?), snapshot.parse().ok()?))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trips_through_parse() {
        let name = file_name(SessionId(42), 7);
        assert_eq!(name, "42_00000000000000000007");
        assert_eq!(parse_name(&name), Some((SessionId(42), 7)));
    }

    #[test]
    fn test_foreign_names_are_ignored() {
        assert_eq!(parse_name("notes.txt"), None);
        assert_eq!(parse_name("3_0007.tmp"), None);
        assert_eq!(parse_name("x_1"), None);
    }
}
