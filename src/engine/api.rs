use crate::storage::{ConfChange, ConfState, StorageError};
use async_trait::async_trait;
use bytes::Bytes;

/// ConsensusEngine orders proposals into the replicated log.
///
/// Committed entries come back out of band, through the engine's `CommitStream`. A successful
/// `propose` only means the engine accepted the proposal, not that it was committed.
#[async_trait]
pub trait ConsensusEngine: Send + Sync + 'static {
    async fn propose(&self, data: Bytes) -> Result<(), EngineError>;

    async fn propose_conf_change(&self, change: ConfChange) -> Result<(), EngineError>;

    /// Called by the apply loop once `change` is applied and `conf_state` is durable.
    fn apply_conf_change(&self, change: &ConfChange, conf_state: &ConfState) -> Result<(), EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("this node cannot accept proposals")]
    NotLeader,
    #[error("consensus engine has stopped")]
    Stopped,
    #[error("consensus engine storage failure")]
    Storage(#[from] StorageError),
}
