use crate::api::http::HttpApi;
use crate::api::options::KvOptionsValidated;
use crate::api::proposals;
use crate::apply::{ApplyLoop, ApplyLoopError, SnapshotPolicy};
use crate::engine::{EngineError, LocalEngine};
use crate::server::{self, HttpServer, ShutdownHandle};
use crate::state_machine::KvReader;
use crate::storage::{LogStore, NodeId, SnapshotStore, StorageError};
use crate::KvOptions;
use axum::Router;
use std::convert::TryFrom;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

pub struct KvNodeConfig {
    pub node_id: NodeId,
    // Created if missing. Holds the log, the hard state, membership and snapshots.
    pub data_directory: PathBuf,
    /// Port 0 picks a free port; see `KvNode::local_addr`.
    pub http_addr: SocketAddr,
    pub info_logger: slog::Logger,
    pub options: KvOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Storage initialization failure")]
    Storage(#[from] StorageError),
    #[error("Consensus engine failed to start")]
    Engine(#[from] EngineError),
    #[error("State machine recovery failure")]
    Recovery(#[from] ApplyLoopError),
    #[error("Failed to bind HTTP listener")]
    Bind(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NodeExitError {
    #[error("Apply loop failed")]
    ApplyLoop(#[from] ApplyLoopError),
    #[error("HTTP server failed")]
    Server(#[source] io::Error),
    #[error("Node task panicked")]
    Panicked(#[from] JoinError),
}

/// KvNode is a running node: storage, consensus engine, apply loop and HTTP API.
pub struct KvNode {
    logger: slog::Logger,
    reader: KvReader,
    router: Router,
    local_addr: SocketAddr,
    shutdown_handle: ShutdownHandle,
    apply_loop: JoinHandle<Result<(), ApplyLoopError>>,
    proposal_pump: JoinHandle<()>,
    server: JoinHandle<io::Result<()>>,
}

pub async fn try_create_kv_node(config: KvNodeConfig) -> Result<KvNode, NodeCreationError> {
    let options = KvOptionsValidated::try_from(config.options)
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))?;
    if config.node_id == 0 {
        return Err(NodeCreationError::IllegalOptions("Node ID must be non-zero".into()));
    }

    let root_logger = config.info_logger.new(slog::o!("node" => config.node_id));

    let log_store = Arc::new(LogStore::open(
        root_logger.new(slog::o!("component" => "log_store")),
        &config.data_directory,
    )?);
    let snapshot_store = Arc::new(SnapshotStore::open(
        root_logger.new(slog::o!("component" => "snapshot_store")),
        &config.data_directory,
    )?);

    let (engine, commit_stream) = LocalEngine::start(
        root_logger.new(slog::o!("component" => "engine")),
        config.node_id,
        log_store.clone(),
    )?;
    let engine = Arc::new(engine);

    let apply_loop = ApplyLoop::recover(
        root_logger.new(slog::o!("component" => "apply_loop")),
        log_store,
        snapshot_store,
        engine.clone(),
        commit_stream,
        SnapshotPolicy {
            threshold: options.snapshot_threshold,
            catch_up_entries: options.snapshot_catch_up_entries,
        },
    )?;
    let reader = apply_loop.reader();

    let (proposal_queue, proposal_pump) = proposals::create_proposal_queue(
        root_logger.new(slog::o!("component" => "proposals")),
        options.proposal_queue_size,
        options.proposal_timeout,
        engine,
    );

    let router = HttpApi::new(
        root_logger.new(slog::o!("component" => "http")),
        reader.clone(),
        proposal_queue,
        options.max_request_body_bytes,
    )
    .into_router();

    let listener = TcpListener::bind(config.http_addr)
        .await
        .map_err(NodeCreationError::Bind)?;
    let local_addr = listener.local_addr().map_err(NodeCreationError::Bind)?;

    let (shutdown_handle, shutdown_signal) = server::shutdown_signal();

    let apply_loop = spawn_dedicated(apply_loop.run(shutdown_signal.clone()));
    let proposal_pump = spawn_dedicated(proposal_pump.run_event_loop(shutdown_signal.clone()));
    let http_server = HttpServer::new(root_logger.new(slog::o!("component" => "server")), router.clone());
    let server = tokio::spawn(http_server.run(listener, shutdown_signal));

    slog::info!(root_logger, "Node started, serving on {}", local_addr);

    Ok(KvNode {
        logger: root_logger,
        reader,
        router,
        local_addr,
        shutdown_handle,
        apply_loop,
        proposal_pump,
        server,
    })
}

/// Runs `future` on its own blocking thread. The apply loop and the proposal pump both fsync
/// synchronously, and must not stall the async workers serving HTTP.
fn spawn_dedicated<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || runtime.block_on(future))
}

impl KvNode {
    /// Read only view of the applied state.
    pub fn reader(&self) -> KvReader {
        self.reader.clone()
    }

    /// The same routes the node serves on `local_addr`, for use without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the node and waits for every task to exit.
    pub async fn shutdown(self) -> Result<(), NodeExitError> {
        self.run_until(async {}).await
    }

    /// Runs until `stop` resolves or the apply loop exits, whichever is first, then stops the
    /// rest of the node. An apply loop failure is returned so the process can exit non-zero.
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> Result<(), NodeExitError> {
        let KvNode {
            logger,
            shutdown_handle,
            mut apply_loop,
            proposal_pump,
            server,
            ..
        } = self;
        tokio::pin!(stop);

        let apply_result = tokio::select! {
            result = &mut apply_loop => Some(result),
            _ = &mut stop => None,
        };

        shutdown_handle.shutdown();
        let apply_result = match apply_result {
            Some(result) => result,
            None => apply_loop.await,
        };

        proposal_pump.await?;
        let server_result = server.await?;

        slog::info!(logger, "Node stopped.");
        apply_result??;
        server_result.map_err(NodeExitError::Server)
    }
}
