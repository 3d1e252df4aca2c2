use crate::storage::bucket::Bucket;
use crate::storage::codec;
use crate::storage::types::{ConfState, HardState, LogEntry, SnapshotMetadata};
use crate::storage::StorageError;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const ENTRIES_BUCKET: &str = "entries";
const META_BUCKET: &str = "meta";

const HARD_STATE_KEY: &str = "hard_state";
const CONF_STATE_KEY: &str = "conf_state";
const COMPACTED_KEY: &str = "compacted";

/// LogStore is the durable storage behind the replicated log.
///
/// Layout on disk:
///
/// * `entries/<index>` - one encoded `LogEntry` per file, keyed by decimal index
/// * `meta/hard_state`, `meta/conf_state` - latest saved values
/// * `meta/compacted` - `(index, term)` of the last entry subsumed by compaction or a snapshot
///
/// Retained entries are always the contiguous range `[first_index(), last_index()]`. A fresh store
/// has `first_index() == 1` and `last_index() == 0`.
///
/// Every mutating method returns only after its effects are synced to disk, and runs entirely under
/// one lock so the read-modify-write of the index bounds can't interleave with another writer.
pub struct LogStore {
    logger: slog::Logger,
    inner: Mutex<LogStoreInner>,
}

struct LogStoreInner {
    entries: Bucket,
    meta: Bucket,
    hard_state: HardState,
    conf_state: ConfState,
    compacted_index: u64,
    compacted_term: u64,
    last_index: u64,
}

impl LogStore {
    pub fn open(logger: slog::Logger, directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref();
        let entries = Bucket::open(directory, ENTRIES_BUCKET)?;
        let meta = Bucket::open(directory, META_BUCKET)?;

        let hard_state = match meta.get(HARD_STATE_KEY)? {
            Some(bytes) => codec::decode_hard_state(&bytes)?,
            None => HardState::default(),
        };
        let conf_state = match meta.get(CONF_STATE_KEY)? {
            Some(bytes) => codec::decode_conf_state(&bytes)?,
            None => ConfState::default(),
        };
        let (compacted_index, compacted_term) = match meta.get(COMPACTED_KEY)? {
            Some(bytes) => codec::decode_log_position(&bytes)?,
            None => (0, 0),
        };

        let last_index = recover_entry_range(&entries, compacted_index)?;

        slog::info!(
            logger,
            "Opened log store. Retained entries [{}, {}], {:?}",
            compacted_index + 1,
            last_index,
            hard_state
        );

        Ok(LogStore {
            logger,
            inner: Mutex::new(LogStoreInner {
                entries,
                meta,
                hard_state,
                conf_state,
                compacted_index,
                compacted_term,
                last_index,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogStoreInner> {
        // A panic while holding the lock can only happen between durable steps, each of which
        // leaves disk consistent, so the in-memory bounds are still the best view we have.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The last persisted hard state and membership, or zero values on a fresh store.
    pub fn initial_state(&self) -> (HardState, ConfState) {
        let inner = self.lock();
        (inner.hard_state, inner.conf_state.clone())
    }

    pub fn hard_state(&self) -> HardState {
        self.lock().hard_state
    }

    pub fn conf_state(&self) -> ConfState {
        self.lock().conf_state.clone()
    }

    /// Highest index ever reported as committed. Entries at or below it are immutable.
    pub fn committed_index(&self) -> u64 {
        self.lock().committed_index()
    }

    pub fn first_index(&self) -> u64 {
        self.lock().first_index()
    }

    pub fn last_index(&self) -> u64 {
        self.lock().last_index
    }

    pub fn save_hard_state(&self, hard_state: HardState) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if hard_state.commit < inner.hard_state.commit {
            return Err(StorageError::CommitRegression {
                current: inner.hard_state.commit,
                proposed: hard_state.commit,
            });
        }

        inner.meta.put(HARD_STATE_KEY, &codec::encode_hard_state(&hard_state))?;
        inner.hard_state = hard_state;

        Ok(())
    }

    pub fn save_conf_state(&self, conf_state: &ConfState) -> Result<(), StorageError> {
        let mut inner = self.lock();

        inner.meta.put(CONF_STATE_KEY, &codec::encode_conf_state(conf_state))?;
        inner.conf_state = conf_state.clone();

        Ok(())
    }

    /// Appends `entries`, which must have consecutive indexes. If the first index is already in the
    /// log, everything from that index onward is replaced, unless that would rewrite committed
    /// history.
    pub fn append(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        let first = match entries.first() {
            Some(entry) => entry.index,
            None => return Ok(()),
        };

        for pair in entries.windows(2) {
            if pair[0].index.checked_add(1) != Some(pair[1].index) {
                return Err(StorageError::NonContiguous {
                    expected: pair[0].index.saturating_add(1),
                    actual: pair[1].index,
                });
            }
        }

        let mut inner = self.lock();

        let committed = inner.committed_index();
        if first <= committed {
            return Err(StorageError::InvalidTruncation { index: first, committed });
        }
        if first > inner.last_index + 1 {
            return Err(StorageError::NonContiguous {
                expected: inner.last_index + 1,
                actual: first,
            });
        }

        if first <= inner.last_index {
            slog::info!(
                self.logger,
                "Discarding conflicting entries [{}, {}]",
                first,
                inner.last_index
            );
            inner.truncate_from(first)?;
        }

        for entry in entries {
            inner.entries.put(&entry.index.to_string(), &codec::encode_entry(entry))?;
            // Track progress per entry so a failure part way leaves memory matching disk.
            inner.last_index = entry.index;
        }

        slog::debug!(self.logger, "Appended entries [{}, {}]", first, inner.last_index);

        Ok(())
    }

    /// Entries in `[lo, hi)`. If `max_size` is set, stops before the entry that would push the
    /// cumulative encoded size past it, but always returns at least one entry if the range isn't
    /// empty.
    pub fn entries(&self, lo: u64, hi: u64, max_size: Option<u64>) -> Result<Vec<LogEntry>, StorageError> {
        let max_size = max_size.unwrap_or(u64::MAX);
        let inner = self.lock();

        if lo < inner.first_index() || hi > inner.last_index + 1 || lo > hi {
            return Err(inner.range_unavailable(lo, hi));
        }

        let mut entries = Vec::with_capacity((hi - lo) as usize);
        let mut total_size: u64 = 0;
        for index in lo..hi {
            let (entry, size) = inner.read_entry(index)?;
            total_size += size;
            if !entries.is_empty() && total_size > max_size {
                break;
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Term of the entry at `index`. Valid for `[first_index() - 1, last_index()]`; the term just
    /// below the retained range is kept for log matching after compaction.
    pub fn term(&self, index: u64) -> Result<u64, StorageError> {
        let inner = self.lock();

        if index == inner.compacted_index {
            return Ok(inner.compacted_term);
        }
        if index < inner.compacted_index || index > inner.last_index {
            return Err(inner.range_unavailable(index, index.saturating_add(1)));
        }

        inner.read_entry(index).map(|(entry, _)| entry.term)
    }

    /// Discards every entry with index `<= up_to_index`. No-op if already compacted that far.
    pub fn compact(&self, up_to_index: u64) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if up_to_index <= inner.compacted_index {
            return Ok(());
        }
        if up_to_index > inner.last_index {
            return Err(StorageError::InvalidCompaction {
                index: up_to_index,
                last_index: inner.last_index,
            });
        }

        let (boundary, _) = inner.read_entry(up_to_index)?;
        let previously_compacted = inner.compacted_index;

        // Boundary first. Reopening cleans up any entry files left at or below it.
        inner.move_compaction_boundary(boundary.index, boundary.term)?;
        for index in (previously_compacted + 1)..=up_to_index {
            inner.entries.delete(&index.to_string())?;
        }
        inner.entries.sync()?;

        slog::info!(self.logger, "Compacted log through index {}", up_to_index);

        Ok(())
    }

    /// Replaces the whole log with the position described by a snapshot. Afterwards the log is empty
    /// with `first_index() == metadata.index + 1`.
    pub fn apply_snapshot(&self, metadata: &SnapshotMetadata) -> Result<(), StorageError> {
        let mut inner = self.lock();

        let committed = inner.committed_index();
        if metadata.index < committed {
            return Err(StorageError::SnapshotOutOfDate {
                snapshot_index: metadata.index,
                committed_index: committed,
            });
        }

        // Entries above the snapshot are uncommitted; drop them while the old boundary still
        // describes the log, so a crash here only leaves a shorter log.
        if inner.last_index > metadata.index {
            inner.truncate_from(metadata.index + 1)?;
        }

        inner.meta.put(CONF_STATE_KEY, &codec::encode_conf_state(&metadata.conf_state))?;
        inner.conf_state = metadata.conf_state.clone();

        // Boundary before the raised commit index. Reopen treats the boundary as committed, but a
        // commit index past the end of the log can't be recovered from.
        let previously_compacted = inner.compacted_index;
        let previous_last = inner.last_index;
        inner.move_compaction_boundary(metadata.index, metadata.term)?;
        inner.last_index = metadata.index;
        for index in (previously_compacted + 1)..=previous_last {
            inner.entries.delete(&index.to_string())?;
        }
        inner.entries.sync()?;

        let hard_state = HardState {
            commit: inner.hard_state.commit.max(metadata.index),
            ..inner.hard_state
        };
        inner.meta.put(HARD_STATE_KEY, &codec::encode_hard_state(&hard_state))?;
        inner.hard_state = hard_state;

        slog::info!(
            self.logger,
            "Installed snapshot at index {} term {}",
            metadata.index,
            metadata.term
        );

        Ok(())
    }
}

impl LogStoreInner {
    fn first_index(&self) -> u64 {
        self.compacted_index + 1
    }

    fn committed_index(&self) -> u64 {
        self.hard_state.commit.max(self.compacted_index)
    }

    fn range_unavailable(&self, lo: u64, hi: u64) -> StorageError {
        StorageError::RangeUnavailable {
            lo,
            hi,
            first_index: self.first_index(),
            last_index: self.last_index,
        }
    }

    /// Returns the entry and its encoded size.
    fn read_entry(&self, index: u64) -> Result<(LogEntry, u64), StorageError> {
        let bytes = self
            .entries
            .get(&index.to_string())?
            .ok_or_else(|| StorageError::corrupt(format!("entry {} is missing from the retained range", index)))?;

        let entry = codec::decode_entry(&bytes)?;
        if entry.index != index {
            return Err(StorageError::corrupt(format!(
                "entry stored under index {} claims index {}",
                index, entry.index
            )));
        }

        Ok((entry, bytes.len() as u64))
    }

    /// Removes `[index, last_index]`, highest first, so a crash part way leaves a contiguous log.
    fn truncate_from(&mut self, index: u64) -> Result<(), StorageError> {
        while self.last_index >= index {
            self.entries.delete(&self.last_index.to_string())?;
            self.last_index -= 1;
        }
        self.entries.sync()?;

        Ok(())
    }

    fn move_compaction_boundary(&mut self, index: u64, term: u64) -> Result<(), StorageError> {
        self.meta.put(COMPACTED_KEY, &codec::encode_log_position(index, term))?;
        self.compacted_index = index;
        self.compacted_term = term;

        Ok(())
    }
}

/// Finds the last retained index, deleting entry files a crash left at or below the compaction
/// boundary.
fn recover_entry_range(entries: &Bucket, compacted_index: u64) -> Result<u64, StorageError> {
    let mut indexes = Vec::new();
    for key in entries.keys()? {
        let index: u64 = key
            .parse()
            .map_err(|_| StorageError::corrupt(format!("unexpected key '{}' in entries", key)))?;

        if index <= compacted_index {
            entries.delete(&key)?;
        } else {
            indexes.push(index);
        }
    }
    entries.sync()?;

    indexes.sort_unstable();

    let mut last_index = compacted_index;
    for index in indexes {
        if index != last_index + 1 {
            return Err(StorageError::corrupt(format!(
                "entries have a gap after index {}; found {}",
                last_index, index
            )));
        }
        last_index = index;
    }

    Ok(last_index)
}
