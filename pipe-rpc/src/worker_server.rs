//! The worker process's lifecycle (spec §4.8): connect out to the
//! registry, register, then serve inbound requests by dispatching them to
//! a user-supplied handler's `MethodTable`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pipe_rpc_core::constants::{
    default_worker_pipe_name, DEFAULT_CONNECT_TIMEOUT, DEFAULT_WORKER_STOP_GRACE,
};
use pipe_rpc_core::{Error, MessageType, PipeMessage, RegisterWorkerRequest};

use crate::connection::Connection;
use crate::dispatch::{self, MethodTable};
use crate::transport::ConnectionFactory;

/// Hook invoked with every inbound request before the reflective dispatch
/// engine runs; returning `Some` pre-empts dispatch entirely (spec §4.8).
pub type RequestHook =
    Arc<dyn Fn(PipeMessage) -> Pin<Box<dyn Future<Output = Option<PipeMessage>> + Send>> + Send + Sync>;

/// Invoked exactly once when the worker's connection to the registry is
/// lost, whether by explicit `stop()` or by transport failure.
pub type ConnectionLostHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub registry_pipe_name: String,
    pub worker_pipe_name: String,
    pub connect_timeout: Duration,
    pub stop_grace: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, registry_pipe_name: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        let worker_pipe_name = default_worker_pipe_name(&worker_id);
        WorkerConfig {
            worker_id,
            registry_pipe_name: registry_pipe_name.into(),
            worker_pipe_name,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stop_grace: DEFAULT_WORKER_STOP_GRACE,
        }
    }
}

#[derive(Default, Clone)]
pub struct WorkerHooks {
    pub on_connection_lost: Option<ConnectionLostHook>,
    pub on_request_received: Option<RequestHook>,
}

/// A worker process's connection to its registry: dials out, registers,
/// and serves requests addressed to it by dispatching them against
/// `method_table`.
pub struct WorkerServer<F: ConnectionFactory> {
    factory: Arc<F>,
    config: WorkerConfig,
    method_table: Arc<MethodTable>,
    hooks: WorkerHooks,
    is_started: AtomicBool,
    connection_lost_fired: AtomicBool,
    cancellation: CancellationToken,
    listen_handle: Mutex<Option<JoinHandle<Result<(), Error>>>>,
}

impl<F: ConnectionFactory + 'static> WorkerServer<F> {
    pub fn new(factory: Arc<F>, config: WorkerConfig, method_table: MethodTable, hooks: WorkerHooks) -> Arc<Self> {
        Arc::new(WorkerServer {
            factory,
            config,
            method_table: Arc::new(method_table),
            hooks,
            is_started: AtomicBool::new(false),
            connection_lost_fired: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
            listen_handle: Mutex::new(None),
        })
    }

    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    /// Connects to the registry, sends exactly one `RegisterWorker`
    /// envelope, then spawns the listen loop in the background. Returns
    /// once registration has completed; the listen loop keeps running
    /// after this call returns.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        let stream = self
            .factory
            .connect(&self.config.registry_pipe_name, self.config.connect_timeout)
            .await?;

        let (connection, read_half) = Connection::with_default_frame_limit(stream);

        let register = PipeMessage::new(
            MessageType::RegisterWorker,
            pipe_rpc_core::Payload::from_value(&RegisterWorkerRequest {
                worker_id: self.config.worker_id.clone(),
                pipe_name: self.config.worker_pipe_name.clone(),
            })?,
        );
        connection.send(&register).await?;
        self.is_started.store(true, Ordering::SeqCst);

        let method_table = Arc::clone(&self.method_table);
        let request_hook = self.hooks.on_request_received.clone();
        let cancellation = self.cancellation.child_token();

        let server = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = crate::connection::listen_loop(connection, read_half, cancellation, move |msg| {
                let method_table = Arc::clone(&method_table);
                let request_hook = request_hook.clone();
                async move {
                    if let Some(hook) = &request_hook {
                        if let Some(reply) = hook(msg.clone()).await {
                            return Some(reply);
                        }
                    }
                    dispatch::dispatch(&method_table, &msg).await
                }
            })
            .await;
            server.fire_connection_lost();
            result
        });

        *self.listen_handle.lock().await = Some(handle);
        Ok(())
    }

    fn fire_connection_lost(&self) {
        if self.connection_lost_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hook) = &self.hooks.on_connection_lost {
            hook();
        }
    }

    /// Cancels the listen loop and waits up to `stop_grace` for it to
    /// finish. Idempotent: a second call observes the loop already gone.
    pub async fn stop(&self) {
        self.cancellation.cancel();

        let handle = self.listen_handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.stop_grace, handle).await.is_err() {
                log::warn!(target: "pipe_rpc::worker_server", "listen loop did not exit within the stop grace period");
            }
        }

        self.fire_connection_lost();
    }
}
