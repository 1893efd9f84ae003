//! The worker registry: the set of live workers a registry process knows
//! about, keyed by worker id and cross-indexed by the connection that bears
//! them. Spec §3 ("Worker record"), §4.5.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::connection::ConnectionId;

/// A hook invoked with a worker id on connect/disconnect. Plain
/// `Option<Arc<dyn Fn>>` rather than a channel or an extra crate — the
/// registry fires these synchronously from whichever task observes the
/// event, same as `azure-functions`' own callback-free style elsewhere in
/// this workspace's teacher.
pub type WorkerEventHook = Arc<dyn Fn(&str) + Send + Sync>;

/// One registered worker: its id, the pipe name it advertised in its
/// `RegisterWorker` envelope, and the connection currently bearing it.
#[derive(Debug, Clone)]
pub struct Worker {
    pub worker_id: String,
    pub worker_pipe_name: String,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(worker_id: impl Into<String>, worker_pipe_name: impl Into<String>, connection_id: ConnectionId) -> Self {
        Worker {
            worker_id: worker_id.into(),
            worker_pipe_name: worker_pipe_name.into(),
            connection_id,
            connected_at: Utc::now(),
        }
    }
}

/// The set of live workers known to a registry process.
///
/// Keyed case-insensitively by `WorkerId` per spec §3. Registering an id
/// that is already present displaces the prior record (last-writer-wins)
/// but does not implicitly disconnect the prior connection: that
/// connection keeps running until its own listen loop ends, at which point
/// [`unregister_by_connection`] is a no-op for the worker id (since the
/// record it would have removed was already displaced) rather than
/// tearing down the newer registration.
pub struct WorkerRegistry {
    by_id: DashMap<String, Worker>,
    by_connection: DashMap<ConnectionId, String>,
    on_connected: Option<WorkerEventHook>,
    on_disconnected: Option<WorkerEventHook>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            by_id: DashMap::new(),
            by_connection: DashMap::new(),
            on_connected: None,
            on_disconnected: None,
        }
    }

    pub fn with_hooks(on_connected: Option<WorkerEventHook>, on_disconnected: Option<WorkerEventHook>) -> Self {
        WorkerRegistry {
            by_id: DashMap::new(),
            by_connection: DashMap::new(),
            on_connected,
            on_disconnected,
        }
    }

    /// Registers `worker`, firing `WorkerConnected`. Displaces (without
    /// disconnecting) any prior record under the same id.
    pub fn register(&self, worker: Worker) {
        let key = worker.worker_id.to_ascii_lowercase();
        self.by_connection.insert(worker.connection_id, worker.worker_id.clone());
        let worker_id = worker.worker_id.clone();
        self.by_id.insert(key, worker);

        if let Some(hook) = &self.on_connected {
            hook(&worker_id);
        }
    }

    /// Removes the worker record bearing `connection_id`, firing
    /// `WorkerDisconnected` exactly once, if (and only if) that connection
    /// is still the current bearer of the worker id it registered under.
    /// Returns the removed record.
    pub fn unregister_by_connection(&self, connection_id: ConnectionId) -> Option<Worker> {
        let (_, worker_id) = self.by_connection.remove(&connection_id)?;
        let key = worker_id.to_ascii_lowercase();

        let still_current = self
            .by_id
            .get(&key)
            .map(|entry| entry.connection_id == connection_id)
            .unwrap_or(false);

        if !still_current {
            return None;
        }

        let (_, worker) = self.by_id.remove(&key)?;
        if let Some(hook) = &self.on_disconnected {
            hook(&worker.worker_id);
        }
        Some(worker)
    }

    pub fn lookup(&self, worker_id: &str) -> Option<Worker> {
        self.by_id.get(&worker_id.to_ascii_lowercase()).map(|entry| entry.clone())
    }

    /// Snapshots the currently registered worker ids. Taken eagerly (not a
    /// live iterator) so callers can safely iterate it while the map keeps
    /// changing underneath (spec §5: "readers snapshot the key set before
    /// iterating").
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.by_id.iter().map(|entry| entry.value().worker_id.clone()).collect()
    }

    /// Snapshots the full worker records currently registered, `connected_at`
    /// included. Purely observational (debug/metrics surfaces); nothing in
    /// the routing or correlation path consumes this.
    pub fn snapshot_workers(&self) -> Vec<Worker> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_then_lookup_then_unregister() {
        let registry = WorkerRegistry::new();
        let conn = ConnectionId::new();
        registry.register(Worker::new("w1", "pipe-w1", conn));

        assert!(registry.lookup("W1").is_some());
        assert_eq!(registry.snapshot_ids(), vec!["w1".to_owned()]);

        let removed = registry.unregister_by_connection(conn).unwrap();
        assert_eq!(removed.worker_id, "w1");
        assert!(registry.lookup("w1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_workers_exposes_connected_at() {
        let registry = WorkerRegistry::new();
        let before = Utc::now();
        registry.register(Worker::new("w1", "pipe-w1", ConnectionId::new()));

        let workers = registry.snapshot_workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker_id, "w1");
        assert!(workers[0].connected_at >= before);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = WorkerRegistry::new();
        registry.register(Worker::new("Worker-One", "pipe", ConnectionId::new()));
        assert!(registry.lookup("worker-one").is_some());
        assert!(registry.lookup("WORKER-ONE").is_some());
    }

    #[test]
    fn fires_connected_and_disconnected_hooks_exactly_once() {
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&connected);
        let d = Arc::clone(&disconnected);
        let registry = WorkerRegistry::with_hooks(
            Some(Arc::new(move |_id: &str| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            Some(Arc::new(move |_id: &str| {
                d.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let conn = ConnectionId::new();
        registry.register(Worker::new("w1", "pipe-w1", conn));
        assert_eq!(connected.load(Ordering::SeqCst), 1);

        registry.unregister_by_connection(conn);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);

        // A second disconnect of the same (now-absent) connection is a no-op.
        registry.unregister_by_connection(conn);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn displacing_registration_keeps_both_connections_tracked_until_close() {
        let registry = WorkerRegistry::new();
        let first_conn = ConnectionId::new();
        let second_conn = ConnectionId::new();

        registry.register(Worker::new("w1", "pipe-w1", first_conn));
        registry.register(Worker::new("w1", "pipe-w1", second_conn));

        // The id now resolves to the newer connection.
        assert_eq!(registry.lookup("w1").unwrap().connection_id, second_conn);

        // The displaced connection closing does not evict the live registration.
        assert!(registry.unregister_by_connection(first_conn).is_none());
        assert_eq!(registry.lookup("w1").unwrap().connection_id, second_conn);

        // The current connection closing does evict it.
        let removed = registry.unregister_by_connection(second_conn).unwrap();
        assert_eq!(removed.connection_id, second_conn);
        assert!(registry.lookup("w1").is_none());
    }
}
