//! Durable byte representation of everything we persist.
//!
//! Every record is framed the same way:
//!
//! ```text
//! | 0 | 1 | 2 | ...                            |
//! +---+---+---+---...--------------------------+
//! |Vrs|   Protobuf message (variable size)     |
//! +---+------------------------------------...-+
//! ```
//!
//! * `Vrs` - version of the serialized payload
//! * Protobuf message - fixed-width-agnostic varint encoding; `u64` fields round trip exactly.
//!
//! Not needed:
//!
//! * Checksum is not needed, records are only ever made visible by an atomic rename of a fully
//!   synced file.
//! * Length prefix is not needed, one record per file.
use crate::storage::types::{
    ConfChange, ConfChangeType, ConfState, EntryKind, HardState, LogEntry, Snapshot, SnapshotMetadata,
};
use crate::storage::StorageError;
use bytes::Bytes;
use prost::Message;

const RECORD_FORMAT_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
enum ProtoEntryKind {
    Normal = 0,
    ConfigChange = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    index: u64,
    #[prost(uint64, tag = "2")]
    term: u64,
    #[prost(enumeration = "ProtoEntryKind", tag = "3")]
    kind: i32,
    #[prost(bytes = "bytes", tag = "4")]
    payload: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoHardState {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(uint64, tag = "2")]
    vote: u64,
    #[prost(uint64, tag = "3")]
    commit: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoConfState {
    #[prost(uint64, repeated, tag = "1")]
    voters: Vec<u64>,
    #[prost(uint64, repeated, tag = "2")]
    learners: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
enum ProtoConfChangeType {
    AddNode = 0,
    RemoveNode = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoConfChange {
    #[prost(enumeration = "ProtoConfChangeType", tag = "1")]
    change_type: i32,
    #[prost(uint64, tag = "2")]
    node_id: u64,
    #[prost(bytes = "bytes", tag = "3")]
    context: Bytes,
}

/// Position of a log entry. Used for the compaction boundary.
#[derive(Clone, PartialEq, prost::Message)]
struct ProtoLogPosition {
    #[prost(uint64, tag = "1")]
    index: u64,
    #[prost(uint64, tag = "2")]
    term: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoSnapshot {
    #[prost(uint64, tag = "1")]
    index: u64,
    #[prost(uint64, tag = "2")]
    term: u64,
    #[prost(message, optional, tag = "3")]
    conf_state: Option<ProtoConfState>,
    #[prost(bytes = "bytes", tag = "4")]
    data: Bytes,
}

// ------- Framing --------

pub(crate) fn frame<M: Message>(message: &M) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + message.encoded_len());
    bytes.push(RECORD_FORMAT_VERSION);
    bytes.extend_from_slice(&message.encode_to_vec());
    bytes
}

pub(crate) fn unframe<M: Message + Default>(bytes: &[u8], record: &str) -> Result<M, StorageError> {
    match bytes.split_first() {
        None => Err(StorageError::corrupt(format!("{} is empty", record))),
        Some((&version, _)) if version != RECORD_FORMAT_VERSION => Err(StorageError::corrupt(format!(
            "{} has unknown format version {}",
            record, version
        ))),
        Some((_, message)) => {
            M::decode(message).map_err(|e| StorageError::corrupt(format!("{} failed to parse: {}", record, e)))
        }
    }
}

// ------- LogEntry --------

pub fn encode_entry(entry: &LogEntry) -> Vec<u8> {
    let kind = match entry.kind {
        EntryKind::Normal => ProtoEntryKind::Normal,
        EntryKind::ConfigChange => ProtoEntryKind::ConfigChange,
    };

    frame(&ProtoLogEntry {
        index: entry.index,
        term: entry.term,
        kind: kind as i32,
        payload: entry.payload.clone(),
    })
}

pub fn decode_entry(bytes: &[u8]) -> Result<LogEntry, StorageError> {
    let proto: ProtoLogEntry = unframe(bytes, "log entry")?;

    let kind = match ProtoEntryKind::try_from(proto.kind) {
        Ok(ProtoEntryKind::Normal) => EntryKind::Normal,
        Ok(ProtoEntryKind::ConfigChange) => EntryKind::ConfigChange,
        Err(_) => {
            return Err(StorageError::corrupt(format!(
                "log entry {} has unknown kind {}",
                proto.index, proto.kind
            )))
        }
    };

    Ok(LogEntry {
        index: proto.index,
        term: proto.term,
        kind,
        payload: proto.payload,
    })
}

// ------- HardState / ConfState --------

pub(crate) fn encode_hard_state(hard_state: &HardState) -> Vec<u8> {
    frame(&ProtoHardState {
        term: hard_state.term,
        vote: hard_state.vote,
        commit: hard_state.commit,
    })
}

pub(crate) fn decode_hard_state(bytes: &[u8]) -> Result<HardState, StorageError> {
    let proto: ProtoHardState = unframe(bytes, "hard state")?;
    Ok(HardState {
        term: proto.term,
        vote: proto.vote,
        commit: proto.commit,
    })
}

fn to_proto_conf_state(conf_state: &ConfState) -> ProtoConfState {
    ProtoConfState {
        voters: conf_state.voters.iter().copied().collect(),
        learners: conf_state.learners.iter().copied().collect(),
    }
}

fn from_proto_conf_state(proto: ProtoConfState) -> ConfState {
    ConfState {
        voters: proto.voters.into_iter().collect(),
        learners: proto.learners.into_iter().collect(),
    }
}

pub(crate) fn encode_conf_state(conf_state: &ConfState) -> Vec<u8> {
    frame(&to_proto_conf_state(conf_state))
}

pub(crate) fn decode_conf_state(bytes: &[u8]) -> Result<ConfState, StorageError> {
    let proto: ProtoConfState = unframe(bytes, "conf state")?;
    Ok(from_proto_conf_state(proto))
}

// ------- ConfChange --------

pub fn encode_conf_change(conf_change: &ConfChange) -> Vec<u8> {
    let change_type = match conf_change.change_type {
        ConfChangeType::AddNode => ProtoConfChangeType::AddNode,
        ConfChangeType::RemoveNode => ProtoConfChangeType::RemoveNode,
    };

    frame(&ProtoConfChange {
        change_type: change_type as i32,
        node_id: conf_change.node_id,
        context: conf_change.context.clone(),
    })
}

pub fn decode_conf_change(bytes: &[u8]) -> Result<ConfChange, StorageError> {
    let proto: ProtoConfChange = unframe(bytes, "conf change")?;

    let change_type = match ProtoConfChangeType::try_from(proto.change_type) {
        Ok(ProtoConfChangeType::AddNode) => ConfChangeType::AddNode,
        Ok(ProtoConfChangeType::RemoveNode) => ConfChangeType::RemoveNode,
        Err(_) => {
            return Err(StorageError::corrupt(format!(
                "conf change has unknown type {}",
                proto.change_type
            )))
        }
    };

    Ok(ConfChange {
        change_type,
        node_id: proto.node_id,
        context: proto.context,
    })
}

// ------- Compaction boundary --------

pub(crate) fn encode_log_position(index: u64, term: u64) -> Vec<u8> {
    frame(&ProtoLogPosition { index, term })
}

pub(crate) fn decode_log_position(bytes: &[u8]) -> Result<(u64, u64), StorageError> {
    let proto: ProtoLogPosition = unframe(bytes, "log position")?;
    Ok((proto.index, proto.term))
}

// ------- Snapshot --------

pub(crate) fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    frame(&ProtoSnapshot {
        index: snapshot.metadata.index,
        term: snapshot.metadata.term,
        conf_state: Some(to_proto_conf_state(&snapshot.metadata.conf_state)),
        data: snapshot.data.clone(),
    })
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, StorageError> {
    let proto: ProtoSnapshot = unframe(bytes, "snapshot")?;
    Ok(Snapshot {
        metadata: SnapshotMetadata {
            index: proto.index,
            term: proto.term,
            conf_state: proto.conf_state.map(from_proto_conf_state).unwrap_or_default(),
        },
        data: proto.data,
    })
}
