mod api;
mod apply;
mod engine;
mod server;
mod state_machine;
mod storage;

pub use api::create_proposal_queue;
pub use api::try_create_kv_node;
pub use api::EnqueueError;
pub use api::HttpApi;
pub use api::KvNode;
pub use api::KvNodeConfig;
pub use api::KvOptions;
pub use api::NodeCreationError;
pub use api::NodeExitError;
pub use api::Proposal;
pub use api::ProposalPump;
pub use api::ProposalQueue;
pub use apply::ApplyLoop;
pub use apply::ApplyLoopError;
pub use apply::SnapshotPolicy;
pub use engine::create_commit_stream;
pub use engine::CommitBatch;
pub use engine::CommitStream;
pub use engine::CommitStreamPublisher;
pub use engine::ConsensusEngine;
pub use engine::EngineError;
pub use engine::LocalEngine;
pub use server::shutdown_signal;
pub use server::ShutdownHandle;
pub use server::ShutdownSignal;
pub use state_machine::apply_conf_change;
pub use state_machine::Applied;
pub use state_machine::KvCommand;
pub use state_machine::KvReader;
pub use state_machine::KvStore;
pub use storage::decode_conf_change;
pub use storage::decode_entry;
pub use storage::encode_conf_change;
pub use storage::encode_entry;
pub use storage::ConfChange;
pub use storage::ConfChangeType;
pub use storage::ConfState;
pub use storage::EntryKind;
pub use storage::HardState;
pub use storage::LogEntry;
pub use storage::LogStore;
pub use storage::NodeId;
pub use storage::Snapshot;
pub use storage::SnapshotMetadata;
pub use storage::SnapshotStore;
pub use storage::StorageError;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
