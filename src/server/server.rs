use crate::server::ShutdownSignal;
use axum::Router;
use std::io;
use tokio::net::TcpListener;

/// HttpServer serves a router on an already bound listener until shutdown.
pub struct HttpServer {
    logger: slog::Logger,
    router: Router,
}

impl HttpServer {
    pub fn new(logger: slog::Logger, router: Router) -> Self {
        HttpServer { logger, router }
    }

    pub async fn run(self, listener: TcpListener, shutdown_signal: ShutdownSignal) -> io::Result<()> {
        let logger = self.logger;
        slog::info!(logger, "Listening on '{:?}'", listener.local_addr()?);

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown_signal.recv().await })
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
        result
    }
}
