//! Durable storage for the replicated log: entries, hard state, membership and snapshots.
mod bucket;
mod codec;
mod error;
mod log_store;
mod snapshot_store;
mod types;

pub use codec::decode_conf_change;
pub use codec::decode_entry;
pub use codec::encode_conf_change;
pub use codec::encode_entry;
pub use error::StorageError;
pub use log_store::LogStore;
pub use snapshot_store::SnapshotStore;
pub use types::ConfChange;
pub use types::ConfChangeType;
pub use types::ConfState;
pub use types::EntryKind;
pub use types::HardState;
pub use types::LogEntry;
pub use types::NodeId;
pub use types::Snapshot;
pub use types::SnapshotMetadata;

// So the state machine can frame its own records the same way.
pub(crate) use codec::{frame, unframe};
