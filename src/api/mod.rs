//! This mod is meant to hold most of the code for the node's client-facing API.
mod http;
mod options;
mod proposals;
mod wiring;

pub use http::HttpApi;
pub use options::KvOptions;
pub use proposals::create_proposal_queue;
pub use proposals::EnqueueError;
pub use proposals::Proposal;
pub use proposals::ProposalPump;
pub use proposals::ProposalQueue;
pub use wiring::try_create_kv_node;
pub use wiring::KvNode;
pub use wiring::KvNodeConfig;
pub use wiring::NodeCreationError;
pub use wiring::NodeExitError;
