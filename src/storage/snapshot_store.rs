use crate::storage::bucket::Bucket;
use crate::storage::codec;
use crate::storage::types::Snapshot;
use crate::storage::StorageError;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SNAPSHOTS_BUCKET: &str = "snapshots";

/// SnapshotStore keeps state machine snapshots under `snapshots/<index>`.
pub struct SnapshotStore {
    logger: slog::Logger,
    // Held for every access, so a load never races a discard.
    snapshots: Mutex<Bucket>,
}

impl SnapshotStore {
    pub fn open(logger: slog::Logger, directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let snapshots = Bucket::open(directory.as_ref(), SNAPSHOTS_BUCKET)?;

        Ok(SnapshotStore {
            logger,
            snapshots: Mutex::new(snapshots),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let snapshots = self.lock();
        snapshots.put(&snapshot.metadata.index.to_string(), &codec::encode_snapshot(snapshot))?;

        slog::info!(
            self.logger,
            "Saved snapshot at index {} term {} ({} bytes)",
            snapshot.metadata.index,
            snapshot.metadata.term,
            snapshot.data.len()
        );

        Ok(())
    }

    pub fn load_latest(&self) -> Result<Option<Snapshot>, StorageError> {
        let snapshots = self.lock();

        let latest = match stored_indexes(&snapshots)?.into_iter().max() {
            Some(index) => index,
            None => return Ok(None),
        };

        let bytes = snapshots
            .get(&latest.to_string())?
            .ok_or_else(|| StorageError::corrupt(format!("snapshot {} vanished while loading", latest)))?;
        let snapshot = codec::decode_snapshot(&bytes)?;
        if snapshot.metadata.index != latest {
            return Err(StorageError::corrupt(format!(
                "snapshot stored under index {} claims index {}",
                latest, snapshot.metadata.index
            )));
        }

        Ok(Some(snapshot))
    }

    /// Deletes every snapshot with an index below `index`.
    pub fn discard_older_than(&self, index: u64) -> Result<(), StorageError> {
        let snapshots = self.lock();

        let mut discarded = 0;
        for stale in stored_indexes(&snapshots)?.into_iter().filter(|i| *i < index) {
            snapshots.delete(&stale.to_string())?;
            discarded += 1;
        }
        snapshots.sync()?;

        if discarded > 0 {
            slog::debug!(self.logger, "Discarded {} snapshot(s) older than {}", discarded, index);
        }

        Ok(())
    }
}

fn stored_indexes(snapshots: &Bucket) -> Result<Vec<u64>, StorageError> {
    Ok(snapshots
        .keys()?
        .into_iter()
        .filter_map(|key| key.parse().ok())
        .collect())
}
