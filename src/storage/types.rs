use bytes::Bytes;
use std::collections::BTreeSet;

/// NodeId identifies a member of the cluster. `0` is reserved to mean "no node".
pub type NodeId = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    Normal,
    ConfigChange,
}

/// LogEntry is a single slot of the replicated log.
///
/// Index starts from 1. There is no entry at index 0; index 0 (term 0) is the position "before
/// the log" that a fresh store reports for `term(first_index() - 1)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn normal(index: u64, term: u64, payload: impl Into<Bytes>) -> Self {
        LogEntry {
            index,
            term,
            kind: EntryKind::Normal,
            payload: payload.into(),
        }
    }

    pub fn config_change(index: u64, term: u64, payload: impl Into<Bytes>) -> Self {
        LogEntry {
            index,
            term,
            kind: EntryKind::ConfigChange,
            payload: payload.into(),
        }
    }
}

/// HardState is the per-node consensus bookkeeping that must survive restarts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HardState {
    pub term: u64,
    pub vote: NodeId,
    pub commit: u64,
}

/// ConfState is the cluster membership as of the last applied configuration change.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfState {
    pub voters: BTreeSet<NodeId>,
    pub learners: BTreeSet<NodeId>,
}

impl ConfState {
    pub fn with_voters(voters: impl IntoIterator<Item = NodeId>) -> Self {
        ConfState {
            voters: voters.into_iter().collect(),
            learners: BTreeSet::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfChangeType {
    AddNode,
    RemoveNode,
}

/// ConfChange is the payload of a `ConfigChange` log entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfChange {
    pub change_type: ConfChangeType,
    pub node_id: NodeId,
    // Opaque to us. Typically the peer's address for AddNode.
    pub context: Bytes,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotMetadata {
    pub index: u64,
    pub term: u64,
    pub conf_state: ConfState,
}

/// Snapshot is a point in time serialization of the state machine that subsumes every log entry
/// up to and including `metadata.index`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Bytes,
}
