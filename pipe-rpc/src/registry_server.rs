//! The registry process: accepts worker connections, runs each one through
//! the registration state machine of spec §4.6, and exposes unicast/
//! broadcast sends (§4.7) backed by the pending-response table.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::poll_immediate;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pipe_rpc_core::constants::{DEFAULT_CALL_TIMEOUT, DEFAULT_REGISTRY_PIPE_NAME, DEFAULT_REGISTRY_STOP_GRACE};
use pipe_rpc_core::{Error, MessageType, PipeMessage, RegisterWorkerRequest};

use crate::connection::{self, Connection, ConnectionId};
use crate::pending::PendingResponseTable;
use crate::transport::ConnectionFactory;
use crate::worker_registry::{Worker, WorkerEventHook, WorkerRegistry};

/// Hook invoked for a frame the registry can't correlate to a pending
/// request: an unsolicited request from a worker (spec §4.6 `onMessage`
/// step 2). Returns the reply to send back, if any.
pub type RequestHook =
    Arc<dyn Fn(PipeMessage) -> Pin<Box<dyn Future<Output = Option<PipeMessage>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub struct RegistryConfig {
    pub pipe_name: String,
    pub call_timeout: Duration,
    pub stop_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            pipe_name: DEFAULT_REGISTRY_PIPE_NAME.to_owned(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            stop_grace: DEFAULT_REGISTRY_STOP_GRACE,
        }
    }
}

/// The three event hooks §6 names for the registry component.
#[derive(Default, Clone)]
pub struct RegistryHooks {
    pub on_worker_connected: Option<WorkerEventHook>,
    pub on_worker_disconnected: Option<WorkerEventHook>,
    pub on_request_received: Option<RequestHook>,
}

/// Tracks which in-flight `MessageId`s were sent over which connection, so
/// that connection's teardown can fail just its own waiters with
/// `Transport` promptly (spec §8 scenario 5) instead of leaving every other
/// in-flight caller to discover the same thing via its own 30s timeout.
#[derive(Default)]
struct InFlightIndex {
    by_connection: DashMap<ConnectionId, Vec<pipe_rpc_core::MessageId>>,
}

impl InFlightIndex {
    fn track(&self, connection_id: ConnectionId, message_id: pipe_rpc_core::MessageId) {
        self.by_connection.entry(connection_id).or_default().push(message_id);
    }

    fn untrack(&self, connection_id: ConnectionId, message_id: pipe_rpc_core::MessageId) {
        if let Some(mut entry) = self.by_connection.get_mut(&connection_id) {
            entry.retain(|id| *id != message_id);
        }
    }

    fn drain(&self, connection_id: ConnectionId) -> Vec<pipe_rpc_core::MessageId> {
        self.by_connection.remove(&connection_id).map(|(_, ids)| ids).unwrap_or_default()
    }
}

/// The registry process: owns the accept loop, the worker registry, the
/// live connection table, and the pending-response table that demultiplexes
/// replies across every connection.
pub struct RegistryServer<F: ConnectionFactory> {
    factory: Arc<F>,
    config: RegistryConfig,
    workers: Arc<WorkerRegistry>,
    connections: DashMap<ConnectionId, Arc<Connection<F::Stream>>>,
    pending: Arc<PendingResponseTable>,
    in_flight: InFlightIndex,
    cancellation: CancellationToken,
    on_request: Option<RequestHook>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory + 'static> RegistryServer<F> {
    pub fn new(factory: Arc<F>, config: RegistryConfig, hooks: RegistryHooks) -> Arc<Self> {
        Arc::new(RegistryServer {
            factory,
            config,
            workers: Arc::new(WorkerRegistry::with_hooks(hooks.on_worker_connected, hooks.on_worker_disconnected)),
            connections: DashMap::new(),
            pending: Arc::new(PendingResponseTable::new()),
            in_flight: InFlightIndex::default(),
            cancellation: CancellationToken::new(),
            on_request: hooks.on_request_received,
            accept_handle: Mutex::new(None),
        })
    }

    pub fn connected_worker_ids(&self) -> Vec<String> {
        self.workers.snapshot_ids()
    }

    pub fn lookup_worker(&self, worker_id: &str) -> Option<Worker> {
        self.workers.lookup(worker_id)
    }

    /// Full worker records currently connected, `connected_at` included —
    /// a debug/metrics surface, not part of routing.
    pub fn snapshot_workers(&self) -> Vec<Worker> {
        self.workers.snapshot_workers()
    }

    /// Spawns the accept loop as a background task. Each accepted
    /// connection gets its own task running the registration state machine
    /// of spec §4.6. The accept loop's handle is retained so that `stop()`
    /// can wait for it to actually unwind rather than just signalling it.
    pub async fn start(self: &Arc<Self>) {
        let server = Arc::clone(self);
        let handle = tokio::spawn(async move { server.accept_loop().await });
        *self.accept_handle.lock().await = Some(handle);
    }

    async fn accept_loop(self: Arc<Self>) {
        loop {
            let accepted = tokio::select! {
                _ = self.cancellation.cancelled() => return,
                accepted = self.factory.accept_one(&self.config.pipe_name) => accepted,
            };

            match accepted {
                Ok(stream) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.handle_connection(stream).await });
                }
                Err(e) => {
                    log::warn!(target: "pipe_rpc::registry_server", "accept failed: {e}");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: F::Stream) {
        let (conn, mut read_half) = Connection::with_default_frame_limit(stream);
        self.connections.insert(conn.id(), Arc::clone(&conn));

        // AWAITING_REGISTER: the first frame on a new connection must be RegisterWorker.
        let registration = connection::read_registration(&mut read_half).await;
        let worker = match registration {
            Ok(msg) if matches!(msg.ty, MessageType::RegisterWorker) => {
                match msg.payload.as_ref().map(|p| p.as_value::<RegisterWorkerRequest>()) {
                    Some(Ok(req)) => {
                        let worker = Worker::new(req.worker_id, req.pipe_name, conn.id());
                        self.workers.register(worker.clone());
                        log::info!(target: "pipe_rpc::registry_server", "worker '{}' connected", worker.worker_id);
                        worker
                    }
                    _ => {
                        log::warn!(target: "pipe_rpc::registry_server", "malformed RegisterWorker payload, closing connection");
                        self.connections.remove(&conn.id());
                        return;
                    }
                }
            }
            Ok(_) => {
                log::warn!(target: "pipe_rpc::registry_server", "first frame was not RegisterWorker, closing connection");
                self.connections.remove(&conn.id());
                return;
            }
            Err(e) => {
                log::debug!(target: "pipe_rpc::registry_server", "connection closed before registration: {e}");
                self.connections.remove(&conn.id());
                return;
            }
        };

        // SERVING
        let pending = Arc::clone(&self.pending);
        let on_request = self.on_request.clone();
        let result = connection::listen_loop(
            Arc::clone(&conn),
            read_half,
            self.cancellation.child_token(),
            move |msg| {
                let pending = Arc::clone(&pending);
                let on_request = on_request.clone();
                async move {
                    if pending.complete(msg.clone()) {
                        return None;
                    }
                    match &on_request {
                        Some(hook) => hook(msg).await,
                        None => {
                            log::warn!(target: "pipe_rpc::registry_server", "dropped unsolicited frame with no RequestReceived hook");
                            None
                        }
                    }
                }
            },
        )
        .await;

        if let Err(e) = result {
            log::warn!(target: "pipe_rpc::registry_server", "connection for worker '{}' ended: {e}", worker.worker_id);
        }

        // CLOSING
        self.connections.remove(&conn.id());
        for message_id in self.in_flight.drain(conn.id()) {
            self.pending.fail_by_id(
                message_id,
                transport_gone(format!("connection for worker '{}' ended before a reply arrived", worker.worker_id)),
            );
        }
        self.workers.unregister_by_connection(conn.id());
    }

    /// Unicasts `request` to `worker_id` and awaits its reply (spec §4.7).
    pub async fn send_to_worker(&self, worker_id: &str, request: PipeMessage, timeout: Duration) -> Result<PipeMessage, Error> {
        let worker = self
            .workers
            .lookup(worker_id)
            .ok_or_else(|| Error::WorkerNotRegistered(worker_id.to_owned()))?;

        let conn = self
            .connections
            .get(&worker.connection_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::ConnectionGone(worker_id.to_owned()))?;

        let message_id = request
            .message_id()
            .ok_or_else(|| Error::Protocol("request has no MessageId to correlate on".into()))?;

        self.in_flight.track(conn.id(), message_id);

        // Register the waiter before writing the frame (spec §5: a reply
        // can otherwise race ahead of the code that would have waited for
        // it). `wait`'s registration happens synchronously before its first
        // await point, so polling the future once is enough to force it.
        let mut waiting = Box::pin(self.pending.wait(&request, timeout));
        let _ = poll_immediate(&mut waiting).await;

        if let Err(e) = conn.send(&request).await {
            self.pending.fail_by_id(message_id, transport_gone(format!("write to worker '{worker_id}' failed: {e}")));
            self.in_flight.untrack(conn.id(), message_id);
            self.connections.remove(&conn.id());
            self.workers.unregister_by_connection(conn.id());
            return Err(e);
        }

        let result = waiting.await;
        self.in_flight.untrack(conn.id(), message_id);
        result
    }

    /// Fans `request` out to every currently connected worker as a relayed
    /// envelope (fresh `MessageId` per spec §3 construction rule 3),
    /// without waiting for any reply — aggregation is the caller's
    /// responsibility (spec §4.7). The typed proxy layer (§4.10) performs
    /// its own fan-out and race instead of going through this method, since
    /// it needs the individual replies; this exists for callers that only
    /// want best-effort delivery.
    pub fn broadcast(self: &Arc<Self>, request: &PipeMessage, timeout: Duration) {
        for worker_id in self.workers.snapshot_ids() {
            let server = Arc::clone(self);
            let relayed = request.relay();
            tokio::spawn(async move {
                if let Err(e) = server.send_to_worker(&worker_id, relayed, timeout).await {
                    log::warn!(target: "pipe_rpc::registry_server", "broadcast to '{worker_id}' failed: {e}");
                }
            });
        }
    }

    /// Cancels the accept loop and every connection's listen loop (each
    /// listen loop runs under a child of this token), then waits up to
    /// `stop_grace` for the accept loop itself to actually unwind rather
    /// than just signalling it (mirrors `WorkerServer::stop`).
    pub async fn stop(&self) {
        self.cancellation.cancel();

        let handle = self.accept_handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.stop_grace, handle).await.is_err() {
                log::warn!(target: "pipe_rpc::registry_server", "accept loop did not exit within the stop grace period");
            }
        }
    }
}

/// A mid-flight disconnect (read-loop EOF/reset, or a write failing
/// outright) is a Transport failure per spec §4.11/§8 scenario 5 — distinct
/// from [`Error::ConnectionGone`], which is reserved for routing-time
/// failures where a send references a worker whose connection has already
/// departed (spec §7).
fn transport_gone(detail: impl Into<String>) -> Error {
    Error::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, detail.into()))
}
