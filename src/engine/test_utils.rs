use crate::engine::{ConsensusEngine, EngineError};
use crate::storage::{ConfChange, ConfState};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

/// Accepts everything and remembers it.
#[derive(Default)]
pub(crate) struct RecordingEngine {
    pub(crate) proposals: Mutex<Vec<Bytes>>,
    pub(crate) conf_change_proposals: Mutex<Vec<ConfChange>>,
    pub(crate) confirmed: Mutex<Vec<(ConfChange, ConfState)>>,
}

#[async_trait]
impl ConsensusEngine for RecordingEngine {
    async fn propose(&self, data: Bytes) -> Result<(), EngineError> {
        self.proposals.lock().unwrap().push(data);
        Ok(())
    }

    async fn propose_conf_change(&self, change: ConfChange) -> Result<(), EngineError> {
        self.conf_change_proposals.lock().unwrap().push(change);
        Ok(())
    }

    fn apply_conf_change(&self, change: &ConfChange, conf_state: &ConfState) -> Result<(), EngineError> {
        self.confirmed.lock().unwrap().push((change.clone(), conf_state.clone()));
        Ok(())
    }
}
