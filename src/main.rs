use raft_kv::{KvNodeConfig, KvOptions};
use slog::Drain;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let logger = create_root_logger_for_stdout();
    let config = single_node_config(logger.clone());

    let node = match raft_kv::try_create_kv_node(config).await {
        Ok(node) => node,
        Err(e) => {
            slog::crit!(logger, "Failed to start node: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            slog::error!(logger, "Failed to listen for ctrl-c: {}", e);
        }
    };

    let exit_code = match node.run_until(stop).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            slog::crit!(logger, "Node exited with error: {:?}", e);
            ExitCode::FAILURE
        }
    };

    // Flush the async drain before exiting.
    drop(logger);
    exit_code
}

fn single_node_config(logger: slog::Logger) -> KvNodeConfig {
    KvNodeConfig {
        node_id: 1,
        data_directory: PathBuf::from("raft-kv-data"),
        http_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 12380)),
        info_logger: logger,
        options: KvOptions::default(),
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
