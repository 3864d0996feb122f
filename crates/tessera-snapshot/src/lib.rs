//! Durable session snapshots for Tessera.
//!
//! One file per snapshot, named `{session}_{snapshot}` inside the save
//! directory. A snapshot is written to a staging directory first and then
//! renamed into place, so the save directory only ever holds complete
//! files. After each save the oldest snapshots of that session beyond the
//! retention count are deleted.
//!
//! ```text
//! temp_saves/3_00000000000000000012.tmp   ← written, synced
//!        │ rename
//!        ▼
//! game_saves/3_00000000000000000012       ← visible to load_latest
//! ```

mod error;
mod store;

pub use error::SnapshotError;
pub use store::{FileSnapshotStore, Snapshot, SnapshotConfig, SnapshotMeta, SnapshotTrigger};
