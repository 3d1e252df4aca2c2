//! The seam between the commit pipeline and whatever orders the log.
mod api;
mod commit_stream;
mod local;

pub use api::ConsensusEngine;
pub use api::EngineError;
pub use commit_stream::create_commit_stream;
pub use commit_stream::CommitBatch;
pub use commit_stream::CommitStream;
pub use commit_stream::CommitStreamPublisher;
pub use local::LocalEngine;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
pub(crate) use test_utils::RecordingEngine;
