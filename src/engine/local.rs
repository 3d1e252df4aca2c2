use crate::engine::commit_stream::{self, CommitBatch, CommitStream, CommitStreamPublisher};
use crate::engine::{ConsensusEngine, EngineError};
use crate::storage::{self, ConfChange, ConfState, EntryKind, HardState, LogEntry, LogStore, NodeId};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// LocalEngine is a consensus engine for a cluster of one voter.
///
/// Each proposal is appended to the `LogStore` and is committed as soon as the append returns,
/// since this node alone is a quorum. Proposals are refused once this node is no longer a voter.
pub struct LocalEngine {
    logger: slog::Logger,
    node_id: NodeId,
    log_store: Arc<LogStore>,
    state: Mutex<LocalEngineState>,
}

struct LocalEngineState {
    publisher: CommitStreamPublisher,
    hard_state: HardState,
    is_voter: bool,
    stopped: bool,
}

impl LocalEngine {
    /// Starts a new term led by `node_id`.
    ///
    /// Anything appended but not committed before a restart is committed by the empty entry that
    /// opens the new term. The first batch on the returned stream carries those entries.
    pub fn start(
        logger: slog::Logger,
        node_id: NodeId,
        log_store: Arc<LogStore>,
    ) -> Result<(Self, CommitStream), EngineError> {
        let (publisher, stream) = commit_stream::create_commit_stream();
        let (hard_state, mut conf_state) = log_store.initial_state();

        if conf_state.voters.is_empty() && conf_state.learners.is_empty() {
            conf_state = ConfState::with_voters(vec![node_id]);
            log_store.save_conf_state(&conf_state)?;
            slog::info!(logger, "Bootstrapped membership with voter {}", node_id);
        }

        let last_index = log_store.last_index();
        let last_term = log_store.term(last_index)?;
        let committed_index = log_store.committed_index();

        let term = hard_state.term.max(last_term) + 1;
        let opening_entry = LogEntry::normal(last_index + 1, term, Bytes::new());
        log_store.append(std::slice::from_ref(&opening_entry))?;

        let hard_state = HardState {
            term,
            vote: node_id,
            commit: opening_entry.index,
        };
        let committed_entries = log_store.entries(committed_index + 1, opening_entry.index + 1, None)?;

        slog::info!(
            logger,
            "Starting term {} at index {} ({} entries to commit)",
            term,
            opening_entry.index,
            committed_entries.len()
        );

        publisher.notify_commit(
            &logger,
            CommitBatch {
                snapshot: None,
                hard_state: Some(hard_state),
                committed_entries,
            },
        );

        let engine = LocalEngine {
            logger,
            node_id,
            log_store,
            state: Mutex::new(LocalEngineState {
                publisher,
                hard_state,
                is_voter: conf_state.voters.contains(&node_id),
                stopped: false,
            }),
        };

        Ok((engine, stream))
    }

    fn lock(&self) -> MutexGuard<'_, LocalEngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append_and_commit(&self, kind: EntryKind, payload: Bytes) -> Result<u64, EngineError> {
        let mut state = self.lock();

        if state.stopped {
            return Err(EngineError::Stopped);
        }
        if !state.is_voter {
            return Err(EngineError::NotLeader);
        }

        let entry = LogEntry {
            index: self.log_store.last_index() + 1,
            term: state.hard_state.term,
            kind,
            payload,
        };
        self.log_store.append(std::slice::from_ref(&entry))?;

        let index = entry.index;
        state.hard_state.commit = index;
        let batch = CommitBatch {
            snapshot: None,
            hard_state: Some(state.hard_state),
            committed_entries: vec![entry],
        };

        if !state.publisher.notify_commit(&self.logger, batch) {
            state.stopped = true;
            return Err(EngineError::Stopped);
        }

        Ok(index)
    }
}

#[async_trait]
impl ConsensusEngine for LocalEngine {
    async fn propose(&self, data: Bytes) -> Result<(), EngineError> {
        let index = self.append_and_commit(EntryKind::Normal, data)?;
        slog::debug!(self.logger, "Committed proposal at index {}", index);
        Ok(())
    }

    async fn propose_conf_change(&self, change: ConfChange) -> Result<(), EngineError> {
        let payload = Bytes::from(storage::encode_conf_change(&change));
        let index = self.append_and_commit(EntryKind::ConfigChange, payload)?;
        slog::debug!(
            self.logger,
            "Committed {:?} of node {} at index {}",
            change.change_type,
            change.node_id,
            index
        );
        Ok(())
    }

    fn apply_conf_change(&self, change: &ConfChange, conf_state: &ConfState) -> Result<(), EngineError> {
        let mut state = self.lock();

        state.is_voter = conf_state.voters.contains(&self.node_id);
        slog::info!(
            self.logger,
            "Membership is now voters {:?} learners {:?} after {:?} of node {}",
            conf_state.voters,
            conf_state.learners,
            change.change_type,
            change.node_id
        );
        if !state.is_voter {
            slog::warn!(self.logger, "Node {} is no longer a voter. Refusing further proposals.", self.node_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ConfChangeType;
    use tempfile::tempdir;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn fresh_start_commits_opening_entry() {
        let dir = tempdir().unwrap();
        let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());

        let (_engine, mut stream) = LocalEngine::start(logger(), 1, log_store.clone()).unwrap();

        let batch = stream.recv().await.unwrap();
        assert_eq!(
            batch.hard_state,
            Some(HardState {
                term: 1,
                vote: 1,
                commit: 1
            })
        );
        assert_eq!(batch.committed_entries, vec![LogEntry::normal(1, 1, Bytes::new())]);
        assert_eq!(log_store.conf_state(), ConfState::with_voters(vec![1]));
    }

    #[tokio::test]
    async fn proposals_are_appended_and_published() {
        let dir = tempdir().unwrap();
        let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());
        let (engine, mut stream) = LocalEngine::start(logger(), 1, log_store.clone()).unwrap();
        stream.recv().await.unwrap();

        engine.propose(Bytes::from_static(b"payload")).await.unwrap();

        let batch = stream.recv().await.unwrap();
        assert_eq!(batch.hard_state.map(|hs| hs.commit), Some(2));
        assert_eq!(batch.committed_entries, vec![LogEntry::normal(2, 1, Bytes::from_static(b"payload"))]);
        assert_eq!(log_store.last_index(), 2);
    }

    #[tokio::test]
    async fn restart_commits_dangling_entries_in_new_term() {
        let dir = tempdir().unwrap();
        {
            let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());
            let (engine, _stream) = LocalEngine::start(logger(), 1, log_store.clone()).unwrap();
            engine.propose(Bytes::from_static(b"a")).await.unwrap();
            engine.propose(Bytes::from_static(b"b")).await.unwrap();
            // Nothing applied, so nothing persisted a hard state.
            assert_eq!(log_store.committed_index(), 0);
        }

        let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());
        let (_engine, mut stream) = LocalEngine::start(logger(), 1, log_store).unwrap();

        let batch = stream.recv().await.unwrap();
        let indexes: Vec<u64> = batch.committed_entries.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 4]);
        assert_eq!(batch.committed_entries[3].term, 2);
        assert_eq!(batch.hard_state.map(|hs| hs.term), Some(2));
    }

    #[tokio::test]
    async fn removed_node_refuses_proposals() {
        let dir = tempdir().unwrap();
        let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());
        let (engine, _stream) = LocalEngine::start(logger(), 1, log_store).unwrap();

        let change = ConfChange {
            change_type: ConfChangeType::RemoveNode,
            node_id: 1,
            context: Bytes::new(),
        };
        engine.apply_conf_change(&change, &ConfState::default()).unwrap();

        assert!(matches!(
            engine.propose(Bytes::from_static(b"x")).await,
            Err(EngineError::NotLeader)
        ));
    }

    #[tokio::test]
    async fn dropped_stream_stops_engine() {
        let dir = tempdir().unwrap();
        let log_store = Arc::new(LogStore::open(logger(), dir.path()).unwrap());
        let (engine, stream) = LocalEngine::start(logger(), 1, log_store).unwrap();
        drop(stream);

        assert!(matches!(
            engine.propose(Bytes::from_static(b"x")).await,
            Err(EngineError::Stopped)
        ));
        assert!(matches!(
            engine.propose(Bytes::from_static(b"y")).await,
            Err(EngineError::Stopped)
        ));
    }
}
