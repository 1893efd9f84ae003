//! Runs the registry half of the calculator demo: accepts worker
//! connections, then either serves until interrupted or issues one call
//! against a connected worker and prints the result, exercising the
//! end-to-end scenarios of spec.md §8.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use calculator_demo::CalculatorProxy;
use clap::{Parser, Subcommand};
use pipe_rpc::core::constants::{DEFAULT_CALL_TIMEOUT, DEFAULT_REGISTRY_PIPE_NAME};
use pipe_rpc::proxy::{BroadcastCaller, UnicastCaller};
use pipe_rpc::registry_server::{RegistryConfig, RegistryHooks};
use pipe_rpc::transport::UnixSocketFactory;
use pipe_rpc::RegistryServer;

#[derive(Parser)]
#[command(name = "registry-demo", about = "Runs the pipe-rpc registry process for the calculator demo.")]
struct Cli {
    /// Pipe (Unix socket) name the registry listens on.
    #[arg(long, default_value = DEFAULT_REGISTRY_PIPE_NAME)]
    pipe_name: String,

    /// Directory the Unix domain socket backing the pipe is created in.
    #[arg(long, default_value = "/tmp/pipe-rpc-demo")]
    socket_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accepts worker connections and serves them until interrupted.
    Serve,
    /// Calls `add(a, b)` on one named worker and prints the result.
    Add { worker_id: String, a: i64, b: i64 },
    /// Calls `lookup(key)` on one named worker and prints the result.
    Lookup { worker_id: String, key: String },
    /// Broadcasts `log_event(message)` to every connected worker.
    Broadcast { message: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.socket_dir)?;
    let factory = Arc::new(UnixSocketFactory::new(&cli.socket_dir));

    let hooks = RegistryHooks {
        on_worker_connected: Some(Arc::new(|id: &str| log::info!("worker '{id}' connected"))),
        on_worker_disconnected: Some(Arc::new(|id: &str| log::info!("worker '{id}' disconnected"))),
        ..Default::default()
    };

    let config = RegistryConfig {
        pipe_name: cli.pipe_name.clone(),
        ..Default::default()
    };

    let registry = RegistryServer::new(factory, config, hooks);
    registry.start().await;

    match cli.command {
        Command::Serve => {
            println!("registry listening on '{}', press Ctrl-C to stop", cli.pipe_name);
            tokio::signal::ctrl_c().await?;
            registry.stop().await;
        }
        Command::Add { worker_id, a, b } => {
            wait_for_worker(&registry, &worker_id).await;
            let proxy = CalculatorProxy::new(UnicastCaller::new(registry.clone(), worker_id), DEFAULT_CALL_TIMEOUT);
            println!("{}", proxy.add(a, b).await?);
        }
        Command::Lookup { worker_id, key } => {
            wait_for_worker(&registry, &worker_id).await;
            let proxy = CalculatorProxy::new(UnicastCaller::new(registry.clone(), worker_id), DEFAULT_CALL_TIMEOUT);
            match proxy.lookup(key).await? {
                Some(value) => println!("{value}"),
                None => println!("<null>"),
            }
        }
        Command::Broadcast { message } => {
            let proxy = CalculatorProxy::new(BroadcastCaller::new(registry.clone()), DEFAULT_CALL_TIMEOUT);
            proxy.log_event(message).await?;
        }
    }

    Ok(())
}

async fn wait_for_worker<F: pipe_rpc::transport::ConnectionFactory + 'static>(
    registry: &Arc<RegistryServer<F>>,
    worker_id: &str,
) {
    for _ in 0..50 {
        if registry.lookup_worker(worker_id).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
