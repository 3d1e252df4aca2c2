use crate::api::proposals::{Proposal, ProposalQueue};
use crate::state_machine::{KvCommand, KvReader};
use crate::storage::{ConfChange, ConfChangeType, NodeId};
use axum::body::{self, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

const ALLOWED_METHODS: &str = "PUT, GET, POST, DELETE";

/// HttpApi serves the key-value store and its membership over HTTP.
///
/// - `PUT /<key>` proposes a write of the request body. 204 once it is queued.
/// - `GET /<key>` reads the applied state. 200 with the value, or 404.
/// - `POST /<node-id>` proposes adding a node, with the request body as its context. 204.
/// - `DELETE /<node-id>` proposes removing a node. 204.
///
/// A 204 means the proposal was handed off, not that it was committed or applied.
#[derive(Clone)]
pub struct HttpApi {
    logger: slog::Logger,
    reader: KvReader,
    proposals: ProposalQueue,
    max_body_bytes: usize,
}

impl HttpApi {
    pub fn new(logger: slog::Logger, reader: KvReader, proposals: ProposalQueue, max_body_bytes: usize) -> Self {
        HttpApi {
            logger,
            reader,
            proposals,
            max_body_bytes,
        }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route("/", any(handle_request))
            .route("/*key", any(handle_request))
            .with_state(self)
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, Response> {
        body::to_bytes(body, self.max_body_bytes).await.map_err(|e| {
            slog::debug!(self.logger, "Failed to read request body: {}", e);
            StatusCode::BAD_REQUEST.into_response()
        })
    }

    async fn propose(&self, proposal: Proposal) -> Response {
        match self.proposals.enqueue(proposal).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => {
                slog::warn!(self.logger, "Rejecting proposal: {}", e);
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        }
    }

    async fn put(&self, key: String, body: Body) -> Response {
        let value = match self.read_body(body).await {
            Ok(value) => value,
            Err(response) => return response,
        };

        slog::debug!(self.logger, "PUT '{}' ({} bytes)", key, value.len());
        let command = KvCommand::Put { key, value };
        self.propose(Proposal::Normal(command.encode())).await
    }

    fn get(&self, key: &str) -> Response {
        match self.reader.lookup(key) {
            Some(value) => (StatusCode::OK, value).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn change_membership(&self, change_type: ConfChangeType, key: &str, body: Body) -> Response {
        let node_id = match parse_node_id(key) {
            Some(node_id) => node_id,
            None => {
                slog::debug!(self.logger, "'{}' is not a node id", key);
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let context = match change_type {
            ConfChangeType::AddNode => match self.read_body(body).await {
                Ok(context) => context,
                Err(response) => return response,
            },
            ConfChangeType::RemoveNode => Bytes::new(),
        };

        slog::info!(self.logger, "Proposing {:?} of node {}", change_type, node_id);
        let change = ConfChange {
            change_type,
            node_id,
            context,
        };
        self.propose(Proposal::ConfChange(change)).await
    }
}

async fn handle_request(State(api): State<HttpApi>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let key = parts.uri.path().trim_start_matches('/').to_string();

    match parts.method {
        Method::PUT => api.put(key, body).await,
        Method::GET => api.get(&key),
        Method::POST => api.change_membership(ConfChangeType::AddNode, &key, body).await,
        Method::DELETE => api.change_membership(ConfChangeType::RemoveNode, &key, body).await,
        _ => (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, ALLOWED_METHODS)]).into_response(),
    }
}

// Decimal only. 0 means "no node".
fn parse_node_id(key: &str) -> Option<NodeId> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    key.parse().ok().filter(|node_id| *node_id != 0)
}
