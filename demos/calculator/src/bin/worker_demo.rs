//! Runs a worker process for the calculator demo: connects out to the
//! registry, registers under `--worker-id`, and serves `Calculator` calls
//! dispatched against a [`CalculatorHandler`] until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use calculator_demo::CalculatorHandler;
use clap::Parser;
use pipe_rpc::core::constants::DEFAULT_REGISTRY_PIPE_NAME;
use pipe_rpc::transport::UnixSocketFactory;
use pipe_rpc::worker_server::{WorkerConfig, WorkerHooks};
use pipe_rpc::WorkerServer;

#[derive(Parser)]
#[command(name = "worker-demo", about = "Runs a pipe-rpc worker process for the calculator demo.")]
struct Cli {
    /// Unique id this worker registers under.
    worker_id: String,

    /// Pipe (Unix socket) name of the registry to connect to.
    #[arg(long, default_value = DEFAULT_REGISTRY_PIPE_NAME)]
    registry_pipe_name: String,

    /// Directory the Unix domain socket backing the pipe lives in.
    #[arg(long, default_value = "/tmp/pipe-rpc-demo")]
    socket_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.socket_dir)?;
    let factory = Arc::new(UnixSocketFactory::new(&cli.socket_dir));

    let handler = Arc::new(CalculatorHandler::new());
    let method_table = handler.into_method_table();

    let hooks = WorkerHooks {
        on_connection_lost: Some(Arc::new(|| log::warn!("connection to registry lost"))),
        ..Default::default()
    };

    let config = WorkerConfig::new(cli.worker_id.clone(), cli.registry_pipe_name.clone());
    let worker = WorkerServer::new(factory, config, method_table, hooks);
    worker.start().await?;

    println!("worker '{}' registered, press Ctrl-C to stop", cli.worker_id);
    tokio::signal::ctrl_c().await?;
    worker.stop().await;

    Ok(())
}
