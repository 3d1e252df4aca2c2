use crate::storage::{HardState, LogEntry, Snapshot};
use tokio::sync::mpsc;

/// CommitBatch is one unit of work for the apply loop. It is handled in field order: snapshot,
/// then hard state, then entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitBatch {
    pub snapshot: Option<Snapshot>,
    pub hard_state: Option<HardState>,
    /// Ascending and contiguous.
    pub committed_entries: Vec<LogEntry>,
}

pub fn create_commit_stream() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = CommitStreamPublisher { sender: tx };
    let stream = CommitStream { receiver: rx };

    (publisher, stream)
}

pub struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<CommitBatch>,
}

impl CommitStreamPublisher {
    /// Returns false if the `CommitStream` has been dropped.
    pub fn notify_commit(&self, logger: &slog::Logger, batch: CommitBatch) -> bool {
        if self.sender.send(batch).is_err() {
            slog::warn!(logger, "CommitStream has disconnected.");
            return false;
        }

        true
    }
}

pub struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommitBatch>,
}

impl CommitStream {
    /// Next batch, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<CommitBatch> {
        self.receiver.recv().await
    }
}
