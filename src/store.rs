//! Durable snapshots
//!
//! The whole ledger state is one pretty-printed JSON document. Writes go to
//! a scratch file, get fsynced, then rename over the live file, so a crash
//! leaves either the old snapshot or the new one, never a torn mix.

use crate::types::{LedgerError, LedgerState};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "ledger.json";

/// Refuse to parse snapshot files larger than this (64 MiB).
const MAX_SNAPSHOT_SIZE: u64 = 64 * 1024 * 1024;

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Prepare a store under `data_dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, LedgerError> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            path: data_dir.as_ref().join(SNAPSHOT_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current snapshot. A missing, oversized or unparsable file
    /// yields a fresh empty state; startup never fails on bad data.
    pub fn load(&self) -> LedgerState {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no snapshot at {}, starting empty", self.path.display());
                return LedgerState::default();
            }
            Err(err) => {
                warn!(
                    "snapshot {} unreadable, starting empty: {}",
                    self.path.display(),
                    err
                );
                return LedgerState::default();
            }
        };
        if data.len() as u64 > MAX_SNAPSHOT_SIZE {
            warn!(
                "snapshot {} too large ({} bytes), starting empty",
                self.path.display(),
                data.len()
            );
            return LedgerState::default();
        }
        match serde_json::from_slice::<LedgerState>(&data) {
            Ok(mut state) => {
                state.reconcile();
                state
            }
            Err(err) => {
                warn!(
                    "snapshot {} corrupt, starting empty: {}",
                    self.path.display(),
                    err
                );
                LedgerState::default()
            }
        }
    }

    /// Write the full state atomically: scratch file, fsync, rename.
    pub fn commit(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fiesta_store_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_commit_then_load_round_trip() {
        let dir = scratch_dir("round_trip");
        let store = SnapshotStore::open(&dir).unwrap();

        let mut state = LedgerState::default();
        state.codes_mut().create("FEST-AAAA-AAAA-AAAA", Some("Mug".into())).unwrap();
        state.codes_mut().create("FEST-BBBB-BBBB-BBBB", None).unwrap();
        state.apply_win(7, "@ana", "FEST-AAAA-AAAA-AAAA", Utc::now()).unwrap();
        state.ban(9);
        state.note_user(7);
        state.set_last_batch(vec!["FEST-BBBB-BBBB-BBBB".to_string()]);

        store.commit(&state).unwrap();
        assert_eq!(store.load(), state);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_snapshot_loads_empty() {
        let dir = scratch_dir("missing");
        let store = SnapshotStore::open(&dir).unwrap();
        assert_eq!(store.load(), LedgerState::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_snapshot_loads_empty() {
        let dir = scratch_dir("corrupt");
        let store = SnapshotStore::open(&dir).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();
        assert_eq!(store.load(), LedgerState::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_commit_replaces_leftover_scratch_file() {
        let dir = scratch_dir("scratch");
        let store = SnapshotStore::open(&dir).unwrap();
        // A crash mid-write leaves a scratch file behind; the next commit
        // must overwrite it and still land atomically.
        fs::write(store.path().with_extension("json.tmp"), b"torn").unwrap();

        let mut state = LedgerState::default();
        state.note_user(1);
        store.commit(&state).unwrap();
        assert_eq!(store.load(), state);
        let _ = fs::remove_dir_all(&dir);
    }
}
