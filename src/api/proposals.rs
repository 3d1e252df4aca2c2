use crate::engine::ConsensusEngine;
use crate::server::ShutdownSignal;
use crate::storage::ConfChange;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

#[derive(Clone, Debug, PartialEq)]
pub enum Proposal {
    /// Encoded `KvCommand`.
    Normal(Bytes),
    ConfChange(ConfChange),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EnqueueError {
    #[error("timed out waiting for room in the proposal queue")]
    Timeout,
    #[error("proposal queue is closed")]
    QueueClosed,
}

pub fn create_proposal_queue<E: ConsensusEngine>(
    logger: slog::Logger,
    queue_size: usize,
    enqueue_timeout: Duration,
    engine: Arc<E>,
) -> (ProposalQueue, ProposalPump<E>) {
    let (tx, rx) = mpsc::channel(queue_size);

    let queue = ProposalQueue {
        sender: tx,
        enqueue_timeout,
    };
    let pump = ProposalPump {
        logger,
        receiver: rx,
        engine,
    };

    (queue, pump)
}

/// ProposalQueue is the producer side, shared by every request handler.
#[derive(Clone)]
pub struct ProposalQueue {
    sender: mpsc::Sender<Proposal>,
    enqueue_timeout: Duration,
}

impl ProposalQueue {
    /// Waits at most `enqueue_timeout` for room in the queue. A proposal that was enqueued may
    /// still be dropped by the engine, so success says nothing about commitment.
    pub async fn enqueue(&self, proposal: Proposal) -> Result<(), EnqueueError> {
        self.sender
            .send_timeout(proposal, self.enqueue_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EnqueueError::Timeout,
                SendTimeoutError::Closed(_) => EnqueueError::QueueClosed,
            })
    }
}

/// ProposalPump hands queued proposals to the consensus engine, one at a time.
pub struct ProposalPump<E: ConsensusEngine> {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Proposal>,
    engine: Arc<E>,
}

impl<E: ConsensusEngine> ProposalPump<E> {
    pub async fn run_event_loop(mut self, shutdown: ShutdownSignal) {
        loop {
            let proposal = tokio::select! {
                _ = shutdown.recv() => break,
                proposal = self.receiver.recv() => match proposal {
                    Some(proposal) => proposal,
                    None => break,
                },
            };

            let result = match proposal {
                Proposal::Normal(data) => self.engine.propose(data).await,
                Proposal::ConfChange(change) => self.engine.propose_conf_change(change).await,
            };

            // Nobody is waiting on the outcome. The client finds out by reading.
            if let Err(e) = result {
                slog::warn!(self.logger, "Consensus engine rejected proposal: {}", e);
            }
        }

        slog::info!(self.logger, "Proposal pump has exited.");
    }
}
