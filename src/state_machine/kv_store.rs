use crate::state_machine::command::{self, KvCommand};
use crate::storage::{self, ConfChange, EntryKind, LogEntry, StorageError};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type KvMap = HashMap<String, Bytes>;

/// What applying a committed entry did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Applied {
    Put,
    Delete,
    /// Empty `Normal` entry. Leaders append these on election; nothing to apply.
    Noop,
    /// Membership change for the caller to act on. The mapping is untouched.
    ConfChange(ConfChange),
}

/// KvStore is the key-value state machine.
///
/// Only the owner of the `KvStore` (the apply loop) can mutate it. Everyone else reads through a
/// `KvReader`, which sees every applied entry in commit order, but only up to the last applied
/// index. A write that was just proposed may not be visible yet.
pub struct KvStore {
    map: Arc<RwLock<KvMap>>,
}

/// KvReader is a read only view of a `KvStore`.
#[derive(Clone)]
pub struct KvReader {
    map: Arc<RwLock<KvMap>>,
}

impl KvStore {
    pub fn new() -> Self {
        KvStore {
            map: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn reader(&self) -> KvReader {
        KvReader { map: self.map.clone() }
    }

    fn write(&mut self) -> RwLockWriteGuard<'_, KvMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a committed entry. Entries must be applied in log order, exactly once.
    pub fn apply(&mut self, entry: &LogEntry) -> Result<Applied, StorageError> {
        match entry.kind {
            EntryKind::ConfigChange => Ok(Applied::ConfChange(storage::decode_conf_change(&entry.payload)?)),
            EntryKind::Normal if entry.payload.is_empty() => Ok(Applied::Noop),
            EntryKind::Normal => match KvCommand::decode(&entry.payload)? {
                KvCommand::Put { key, value } => {
                    self.write().insert(key, value);
                    Ok(Applied::Put)
                }
                KvCommand::Delete { key } => {
                    self.write().remove(&key);
                    Ok(Applied::Delete)
                }
            },
        }
    }

    /// Identical mappings always produce identical bytes.
    pub fn snapshot(&self) -> Bytes {
        self.reader().snapshot()
    }

    /// Replaces the entire mapping with the contents of `data`.
    pub fn restore(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let pairs = command::decode_snapshot(data)?;
        *self.write() = pairs.into_iter().collect();
        Ok(())
    }

    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        self.reader().lookup(key)
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvReader {
    fn read(&self) -> RwLockReadGuard<'_, KvMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn snapshot(&self) -> Bytes {
        let map = self.read();
        let mut pairs: Vec<(&String, &Bytes)> = map.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        command::encode_snapshot(pairs.into_iter())
    }
}
