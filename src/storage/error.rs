use std::io;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    // Bytes on disk (or on the wire) don't parse to a valid record. Never retry.
    #[error("Corrupt record: {0}")]
    CorruptEntry(String),

    #[error("Refusing to overwrite index {index}; history is committed through {committed}")]
    InvalidTruncation { index: u64, committed: u64 },

    // Recoverable. The caller should fall back to installing a snapshot.
    #[error("Range [{lo}, {hi}) is unavailable; retained entries are [{first_index}, {last_index}]")]
    RangeUnavailable {
        lo: u64,
        hi: u64,
        first_index: u64,
        last_index: u64,
    },

    #[error("Can't compact through {index}; last index is {last_index}")]
    InvalidCompaction { index: u64, last_index: u64 },

    #[error("Expected entry at index {expected}, got {actual}")]
    NonContiguous { expected: u64, actual: u64 },

    #[error("Commit index can't move backwards from {current} to {proposed}")]
    CommitRegression { current: u64, proposed: u64 },

    #[error("Snapshot at index {snapshot_index} is older than committed index {committed_index}")]
    SnapshotOutOfDate { snapshot_index: u64, committed_index: u64 },

    #[error("Storage IO failure")]
    Io(#[from] io::Error),
}

impl StorageError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        StorageError::CorruptEntry(message.into())
    }
}
