use crate::engine::{CommitBatch, CommitStream, ConsensusEngine, EngineError};
use crate::server::ShutdownSignal;
use crate::state_machine::{self, Applied, KvReader, KvStore};
use crate::storage::{LogEntry, LogStore, Snapshot, SnapshotMetadata, SnapshotStore, StorageError};
use std::sync::Arc;

// Upper bound on a single read while replaying the log on startup.
const REPLAY_READ_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApplyLoopError {
    #[error("storage failure while applying")]
    Storage(#[from] StorageError),
    #[error("committed entry {index} has a corrupt payload")]
    CorruptPayload {
        index: u64,
        #[source]
        source: StorageError,
    },
    #[error("gap in committed entries: applied up to {applied} but received {received}")]
    Gap { applied: u64, received: u64 },
    #[error("consensus engine rejected a membership change")]
    Engine(#[from] EngineError),
}

/// When to snapshot the state machine and compact the log.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotPolicy {
    /// Snapshot once the retained log holds more entries than this.
    pub threshold: u64,
    /// Entries kept below the snapshot so lagging peers can catch up without one.
    pub catch_up_entries: u64,
}

/// ApplyLoop is the only writer of the `KvStore`. It applies committed entries strictly in index
/// order and keeps the log compacted behind the latest snapshot.
pub struct ApplyLoop<E: ConsensusEngine> {
    logger: slog::Logger,
    log_store: Arc<LogStore>,
    snapshot_store: Arc<SnapshotStore>,
    engine: Arc<E>,
    commit_stream: CommitStream,
    kv_store: KvStore,
    policy: SnapshotPolicy,
    applied_index: u64,
    snapshot_index: u64,
}

impl<E: ConsensusEngine> ApplyLoop<E> {
    /// Rebuilds the state machine from the latest snapshot plus the committed log after it.
    pub fn recover(
        logger: slog::Logger,
        log_store: Arc<LogStore>,
        snapshot_store: Arc<SnapshotStore>,
        engine: Arc<E>,
        commit_stream: CommitStream,
        policy: SnapshotPolicy,
    ) -> Result<Self, ApplyLoopError> {
        let mut apply_loop = ApplyLoop {
            logger,
            log_store,
            snapshot_store,
            engine,
            commit_stream,
            kv_store: KvStore::new(),
            policy,
            applied_index: 0,
            snapshot_index: 0,
        };

        if let Some(snapshot) = apply_loop.snapshot_store.load_latest()? {
            apply_loop.kv_store.restore(&snapshot.data)?;
            apply_loop.applied_index = snapshot.metadata.index;
            apply_loop.snapshot_index = snapshot.metadata.index;
            slog::info!(
                apply_loop.logger,
                "Restored snapshot at index {} term {}",
                snapshot.metadata.index,
                snapshot.metadata.term
            );
        }

        let commit = apply_loop.log_store.hard_state().commit;
        let mut replayed = 0;
        while apply_loop.applied_index < commit {
            let entries =
                apply_loop
                    .log_store
                    .entries(apply_loop.applied_index + 1, commit + 1, Some(REPLAY_READ_BYTES))?;
            for entry in &entries {
                apply_loop.apply_entry(entry)?;
            }
            replayed += entries.len();
        }

        slog::info!(
            apply_loop.logger,
            "Recovered state machine at index {} ({} entries replayed, {} keys)",
            apply_loop.applied_index,
            replayed,
            apply_loop.kv_store.reader().len()
        );

        Ok(apply_loop)
    }

    pub fn reader(&self) -> KvReader {
        self.kv_store.reader()
    }

    pub fn applied_index(&self) -> u64 {
        self.applied_index
    }

    /// Runs until the commit stream closes or `shutdown` fires. Any error is fatal for the node.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<(), ApplyLoopError> {
        loop {
            let batch = tokio::select! {
                _ = shutdown.recv() => {
                    slog::info!(self.logger, "Apply loop shutting down at index {}", self.applied_index);
                    return Ok(());
                }
                batch = self.commit_stream.recv() => batch,
            };

            let batch = match batch {
                Some(batch) => batch,
                None => {
                    slog::info!(self.logger, "Commit stream closed at index {}", self.applied_index);
                    return Ok(());
                }
            };

            if let Err(e) = self.handle_batch(batch) {
                slog::crit!(self.logger, "Apply loop failed at index {}: {}", self.applied_index, e);
                return Err(e);
            }
        }
    }

    fn handle_batch(&mut self, batch: CommitBatch) -> Result<(), ApplyLoopError> {
        if let Some(snapshot) = batch.snapshot {
            self.install_snapshot(snapshot)?;
        }

        if let Some(hard_state) = batch.hard_state {
            self.log_store.save_hard_state(hard_state)?;
        }

        for entry in &batch.committed_entries {
            self.apply_entry(entry)?;
        }

        self.maybe_snapshot()
    }

    fn install_snapshot(&mut self, snapshot: Snapshot) -> Result<(), ApplyLoopError> {
        let index = snapshot.metadata.index;
        if index <= self.applied_index {
            slog::debug!(
                self.logger,
                "Ignoring snapshot at index {}, already applied {}",
                index,
                self.applied_index
            );
            return Ok(());
        }

        self.snapshot_store.save(&snapshot)?;
        self.log_store.apply_snapshot(&snapshot.metadata)?;
        self.kv_store.restore(&snapshot.data)?;

        self.applied_index = index;
        self.snapshot_index = index;
        slog::info!(self.logger, "Installed snapshot at index {} term {}", index, snapshot.metadata.term);

        Ok(())
    }

    fn apply_entry(&mut self, entry: &LogEntry) -> Result<(), ApplyLoopError> {
        if entry.index <= self.applied_index {
            return Ok(());
        }
        if entry.index != self.applied_index + 1 {
            return Err(ApplyLoopError::Gap {
                applied: self.applied_index,
                received: entry.index,
            });
        }

        let applied = self.kv_store.apply(entry).map_err(|source| ApplyLoopError::CorruptPayload {
            index: entry.index,
            source,
        })?;

        match applied {
            Applied::ConfChange(change) => {
                let conf_state = state_machine::apply_conf_change(&self.log_store.conf_state(), &change);
                self.log_store.save_conf_state(&conf_state)?;
                self.engine.apply_conf_change(&change, &conf_state)?;
            }
            other => slog::debug!(self.logger, "Applied entry {}: {:?}", entry.index, other),
        }

        self.applied_index = entry.index;
        Ok(())
    }

    fn maybe_snapshot(&mut self) -> Result<(), ApplyLoopError> {
        let retained = self
            .log_store
            .last_index()
            .saturating_sub(self.log_store.first_index());
        if retained <= self.policy.threshold || self.applied_index <= self.snapshot_index {
            return Ok(());
        }

        let metadata = SnapshotMetadata {
            index: self.applied_index,
            term: self.log_store.term(self.applied_index)?,
            conf_state: self.log_store.conf_state(),
        };
        let snapshot = Snapshot {
            metadata,
            data: self.kv_store.snapshot(),
        };
        self.snapshot_store.save(&snapshot)?;
        self.snapshot_index = self.applied_index;

        let compact_index = self.applied_index.saturating_sub(self.policy.catch_up_entries);
        match self.log_store.compact(compact_index) {
            Ok(()) => {}
            Err(e @ StorageError::InvalidCompaction { .. }) if !cfg!(debug_assertions) => {
                slog::warn!(self.logger, "Skipping compaction: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
        self.snapshot_store.discard_older_than(self.snapshot_index)?;

        slog::info!(
            self.logger,
            "Snapshot at index {}, log compacted through {}",
            self.snapshot_index,
            compact_index
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{create_commit_stream, CommitStreamPublisher, RecordingEngine};
    use crate::server::shutdown_signal;
    use crate::state_machine::KvCommand;
    use crate::storage::{encode_conf_change, ConfChange, ConfChangeType, ConfState, HardState};
    use bytes::Bytes;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        log_store: Arc<LogStore>,
        snapshot_store: Arc<SnapshotStore>,
        engine: Arc<RecordingEngine>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            Self::open(dir)
        }

        fn open(dir: TempDir) -> Self {
            Fixture {
                log_store: Arc::new(LogStore::open(logger(), dir.path()).unwrap()),
                snapshot_store: Arc::new(SnapshotStore::open(logger(), dir.path()).unwrap()),
                engine: Arc::new(RecordingEngine::default()),
                dir,
            }
        }

        fn reopen(self) -> Self {
            let Fixture { dir, .. } = self;
            Self::open(dir)
        }

        fn apply_loop(&self, policy: SnapshotPolicy) -> (CommitStreamPublisher, ApplyLoop<RecordingEngine>) {
            let (publisher, stream) = create_commit_stream();
            let apply_loop = ApplyLoop::recover(
                logger(),
                self.log_store.clone(),
                self.snapshot_store.clone(),
                self.engine.clone(),
                stream,
                policy,
            )
            .unwrap();
            (publisher, apply_loop)
        }

        /// Appends `entries` and returns the batch that commits them.
        fn commit(&self, entries: Vec<LogEntry>) -> CommitBatch {
            self.log_store.append(&entries).unwrap();
            let commit = entries.last().map(|e| e.index).unwrap_or(0);
            CommitBatch {
                snapshot: None,
                hard_state: Some(HardState {
                    term: 1,
                    vote: 1,
                    commit,
                }),
                committed_entries: entries,
            }
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn lenient() -> SnapshotPolicy {
        SnapshotPolicy {
            threshold: 1000,
            catch_up_entries: 100,
        }
    }

    fn put(index: u64, key: &str, value: &str) -> LogEntry {
        let command = KvCommand::Put {
            key: key.to_string(),
            value: Bytes::from(value.to_string()),
        };
        LogEntry::normal(index, 1, command.encode())
    }

    fn puts(range: std::ops::RangeInclusive<u64>) -> Vec<LogEntry> {
        range.map(|i| put(i, &format!("key-{}", i), &i.to_string())).collect()
    }

    #[test]
    fn applies_batches_in_order() {
        let fixture = Fixture::new();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());

        apply_loop.handle_batch(fixture.commit(vec![put(1, "foo", "bar"), put(2, "foo", "baz")])).unwrap();

        assert_eq!(apply_loop.applied_index(), 2);
        assert_eq!(apply_loop.reader().lookup("foo"), Some(Bytes::from("baz")));
        assert_eq!(fixture.log_store.committed_index(), 2);
    }

    #[test]
    fn redelivered_entries_are_skipped() {
        let fixture = Fixture::new();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());

        let batch = fixture.commit(vec![put(1, "foo", "one")]);
        let redelivered = CommitBatch {
            committed_entries: batch.committed_entries.clone(),
            ..CommitBatch::default()
        };
        apply_loop.handle_batch(batch).unwrap();
        apply_loop.handle_batch(fixture.commit(vec![put(2, "foo", "two")])).unwrap();
        apply_loop.handle_batch(redelivered).unwrap();

        assert_eq!(apply_loop.applied_index(), 2);
        assert_eq!(apply_loop.reader().lookup("foo"), Some(Bytes::from("two")));
    }

    #[test]
    fn gap_is_fatal() {
        let fixture = Fixture::new();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());
        apply_loop.handle_batch(fixture.commit(vec![put(1, "a", "1")])).unwrap();

        let batch = CommitBatch {
            committed_entries: vec![put(3, "c", "3")],
            ..CommitBatch::default()
        };
        match apply_loop.handle_batch(batch) {
            Err(ApplyLoopError::Gap { applied: 1, received: 3 }) => {}
            other => panic!("Expected gap, got {:?}", other),
        }
    }

    #[test]
    fn corrupt_payload_is_fatal() {
        let fixture = Fixture::new();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());

        let batch = fixture.commit(vec![LogEntry::normal(1, 1, Bytes::from_static(b"\x07garbage"))]);
        match apply_loop.handle_batch(batch) {
            Err(ApplyLoopError::CorruptPayload { index: 1, .. }) => {}
            other => panic!("Expected corrupt payload, got {:?}", other),
        }
        assert_eq!(apply_loop.applied_index(), 0);
    }

    #[test]
    fn conf_change_is_persisted_and_confirmed() {
        let fixture = Fixture::new();
        fixture.log_store.save_conf_state(&ConfState::with_voters(vec![1])).unwrap();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());

        let change = ConfChange {
            change_type: ConfChangeType::AddNode,
            node_id: 2,
            context: Bytes::from_static(b"http://127.0.0.1:12380"),
        };
        let entry = LogEntry::config_change(1, 1, encode_conf_change(&change));
        apply_loop.handle_batch(fixture.commit(vec![entry])).unwrap();

        let expected = ConfState::with_voters(vec![1, 2]);
        assert_eq!(fixture.log_store.conf_state(), expected);
        assert_eq!(*fixture.engine.confirmed.lock().unwrap(), vec![(change, expected)]);
        assert!(apply_loop.reader().is_empty());
    }

    #[test]
    fn threshold_triggers_snapshot_and_compaction() {
        let fixture = Fixture::new();
        let policy = SnapshotPolicy {
            threshold: 10,
            catch_up_entries: 3,
        };
        let (_publisher, mut apply_loop) = fixture.apply_loop(policy);

        apply_loop.handle_batch(fixture.commit(puts(1..=10))).unwrap();
        assert_eq!(fixture.snapshot_store.load_latest().unwrap(), None);

        apply_loop.handle_batch(fixture.commit(puts(11..=12))).unwrap();

        let snapshot = fixture.snapshot_store.load_latest().unwrap().unwrap();
        assert_eq!(snapshot.metadata.index, 12);
        assert_eq!(snapshot.metadata.term, 1);
        assert_eq!(fixture.log_store.first_index(), 10);
        assert_eq!(fixture.log_store.last_index(), 12);

        // Retained log is back under the threshold.
        apply_loop.handle_batch(fixture.commit(puts(13..=13))).unwrap();
        assert_eq!(fixture.snapshot_store.load_latest().unwrap().unwrap().metadata.index, 12);
    }

    #[test]
    fn restart_recovers_from_snapshot_and_log() {
        let fixture = Fixture::new();
        let policy = SnapshotPolicy {
            threshold: 5,
            catch_up_entries: 2,
        };
        {
            let (_publisher, mut apply_loop) = fixture.apply_loop(policy);
            apply_loop.handle_batch(fixture.commit(puts(1..=8))).unwrap();
            apply_loop.handle_batch(fixture.commit(puts(9..=10))).unwrap();
        }
        assert_eq!(fixture.snapshot_store.load_latest().unwrap().unwrap().metadata.index, 8);

        let fixture = fixture.reopen();
        let (_publisher, apply_loop) = fixture.apply_loop(policy);

        assert_eq!(apply_loop.applied_index(), 10);
        let reader = apply_loop.reader();
        assert_eq!(reader.len(), 10);
        assert_eq!(reader.lookup("key-1"), Some(Bytes::from("1")));
        assert_eq!(reader.lookup("key-10"), Some(Bytes::from("10")));
    }

    #[test]
    fn installs_newer_snapshot() {
        let fixture = Fixture::new();
        let (_publisher, mut apply_loop) = fixture.apply_loop(lenient());
        apply_loop.handle_batch(fixture.commit(vec![put(1, "old", "x")])).unwrap();

        let mut donor = KvStore::new();
        donor.apply(&put(1, "new", "y")).unwrap();
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                index: 20,
                term: 3,
                conf_state: ConfState::with_voters(vec![1, 2, 3]),
            },
            data: donor.snapshot(),
        };
        let batch = CommitBatch {
            snapshot: Some(snapshot.clone()),
            ..CommitBatch::default()
        };
        apply_loop.handle_batch(batch.clone()).unwrap();

        assert_eq!(apply_loop.applied_index(), 20);
        assert_eq!(apply_loop.reader().lookup("old"), None);
        assert_eq!(apply_loop.reader().lookup("new"), Some(Bytes::from("y")));
        assert_eq!(fixture.log_store.first_index(), 21);
        assert_eq!(fixture.log_store.conf_state(), ConfState::with_voters(vec![1, 2, 3]));
        assert_eq!(fixture.snapshot_store.load_latest().unwrap(), Some(snapshot));

        // Same snapshot again is stale.
        apply_loop.handle_batch(batch).unwrap();
        assert_eq!(apply_loop.applied_index(), 20);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown_or_closed_stream() {
        let fixture = Fixture::new();

        let (publisher, apply_loop) = fixture.apply_loop(lenient());
        let (handle, signal) = shutdown_signal();
        let task = tokio::spawn(apply_loop.run(signal));
        publisher.notify_commit(&logger(), fixture.commit(vec![put(1, "k", "v")]));
        drop(handle);
        assert!(task.await.unwrap().is_ok());

        let (publisher, apply_loop) = fixture.apply_loop(lenient());
        let (_handle, signal) = shutdown_signal();
        drop(publisher);
        assert!(apply_loop.run(signal).await.is_ok());
    }

    #[tokio::test]
    async fn run_surfaces_fatal_errors() {
        let fixture = Fixture::new();
        let (publisher, apply_loop) = fixture.apply_loop(lenient());
        let (_handle, signal) = shutdown_signal();

        publisher.notify_commit(
            &logger(),
            CommitBatch {
                committed_entries: vec![put(5, "k", "v")],
                ..CommitBatch::default()
            },
        );

        assert!(matches!(apply_loop.run(signal).await, Err(ApplyLoopError::Gap { .. })));
    }
}
