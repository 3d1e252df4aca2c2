use crate::storage::{frame, unframe, StorageError};
use bytes::Bytes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
enum ProtoKvOp {
    Put = 0,
    Delete = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoKvCommand {
    #[prost(enumeration = "ProtoKvOp", tag = "1")]
    op: i32,
    #[prost(string, tag = "2")]
    key: String,
    #[prost(bytes = "bytes", tag = "3")]
    value: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoKvPair {
    #[prost(string, tag = "1")]
    key: String,
    #[prost(bytes = "bytes", tag = "2")]
    value: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoKvSnapshot {
    #[prost(message, repeated, tag = "1")]
    pairs: Vec<ProtoKvPair>,
}

/// KvCommand is the payload of a `Normal` log entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KvCommand {
    Put { key: String, value: Bytes },
    Delete { key: String },
}

impl KvCommand {
    pub fn encode(&self) -> Bytes {
        let proto = match self {
            KvCommand::Put { key, value } => ProtoKvCommand {
                op: ProtoKvOp::Put as i32,
                key: key.clone(),
                value: value.clone(),
            },
            KvCommand::Delete { key } => ProtoKvCommand {
                op: ProtoKvOp::Delete as i32,
                key: key.clone(),
                value: Bytes::new(),
            },
        };

        Bytes::from(frame(&proto))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let proto: ProtoKvCommand = unframe(bytes, "kv command")?;

        match ProtoKvOp::try_from(proto.op) {
            Ok(ProtoKvOp::Put) => Ok(KvCommand::Put {
                key: proto.key,
                value: proto.value,
            }),
            Ok(ProtoKvOp::Delete) => Ok(KvCommand::Delete { key: proto.key }),
            Err(_) => Err(StorageError::corrupt(format!("kv command has unknown op {}", proto.op))),
        }
    }
}

/// `pairs` must already be in a deterministic order.
pub(super) fn encode_snapshot<'a>(pairs: impl Iterator<Item = (&'a String, &'a Bytes)>) -> Bytes {
    let proto = ProtoKvSnapshot {
        pairs: pairs
            .map(|(key, value)| ProtoKvPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    };

    Bytes::from(frame(&proto))
}

pub(super) fn decode_snapshot(bytes: &[u8]) -> Result<Vec<(String, Bytes)>, StorageError> {
    let proto: ProtoKvSnapshot = unframe(bytes, "kv snapshot")?;
    Ok(proto.pairs.into_iter().map(|pair| (pair.key, pair.value)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trip() {
        let put = KvCommand::Put {
            key: "foo".into(),
            value: Bytes::from_static(b"bar"),
        };
        assert_eq!(KvCommand::decode(&put.encode()).unwrap(), put);

        let delete = KvCommand::Delete { key: "foo".into() };
        assert_eq!(KvCommand::decode(&delete.encode()).unwrap(), delete);
    }

    #[test]
    fn unknown_op_is_corrupt() {
        let bytes = frame(&ProtoKvCommand {
            op: 9,
            key: "foo".into(),
            value: Bytes::new(),
        });
        assert!(matches!(KvCommand::decode(&bytes), Err(StorageError::CorruptEntry(_))));
    }
}
