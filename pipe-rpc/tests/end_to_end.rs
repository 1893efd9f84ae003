//! End-to-end scenarios from spec.md §8, driven entirely in-process over
//! [`pipe_rpc::transport::DuplexFactory`] (the registry and each worker run
//! as ordinary tasks sharing one process, standing in for separate named
//! pipes connected over an actual OS transport).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipe_rpc::core::constants::DEFAULT_CALL_TIMEOUT;
use pipe_rpc::core::{Error, Payload, PipeMessage};
use pipe_rpc::proxy::{BroadcastCaller, RpcCaller, RpcError, UnicastCaller};
use pipe_rpc::registry_server::{RegistryConfig, RegistryHooks};
use pipe_rpc::transport::DuplexFactory;
use pipe_rpc::worker_server::{WorkerConfig, WorkerHooks};
use pipe_rpc::{rpc_handler, rpc_interface, RegistryServer, WorkerServer};

#[rpc_interface]
#[async_trait]
trait Greeter: Send + Sync {
    async fn add(&self, a: i64, b: i64) -> i64;
    async fn do_work(&self, message: String);
    async fn maybe_add(&self, a: i64, b: i64) -> Option<i64>;
}

struct GreeterHandler {
    worked: Arc<AtomicBool>,
    /// When true, `maybe_add` answers `None` instead of `Some(a + b)`, so a
    /// test can mix a silent worker with a talkative one in one broadcast.
    silent: bool,
}

impl GreeterHandler {
    fn new(worked: Arc<AtomicBool>) -> Self {
        GreeterHandler { worked, silent: false }
    }

    fn silent(worked: Arc<AtomicBool>) -> Self {
        GreeterHandler { worked, silent: true }
    }
}

#[rpc_handler]
#[async_trait]
impl Greeter for GreeterHandler {
    async fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    async fn do_work(&self, _message: String) {
        self.worked.store(true, Ordering::SeqCst);
    }

    async fn maybe_add(&self, a: i64, b: i64) -> Option<i64> {
        if self.silent {
            None
        } else {
            Some(a + b)
        }
    }
}

/// One in-memory registry plus the factory every worker in a test dials
/// into; bundled together since `DuplexFactory::connect` is how a worker
/// "finds" the registry's pipe name in this transport.
struct Harness {
    registry: Arc<RegistryServer<DuplexFactory>>,
    factory: Arc<DuplexFactory>,
}

impl Harness {
    async fn new() -> Self {
        let factory = Arc::new(DuplexFactory::new());
        let registry = RegistryServer::new(Arc::clone(&factory), RegistryConfig::default(), RegistryHooks::default());
        registry.start().await;
        Harness { registry, factory }
    }

    async fn spawn_worker(&self, worker_id: &str, handler: GreeterHandler) -> Arc<WorkerServer<DuplexFactory>> {
        let handler = Arc::new(handler);
        let table = handler.into_method_table();
        let config = WorkerConfig::new(worker_id, "registry");
        let worker = WorkerServer::new(Arc::clone(&self.factory), config, table, WorkerHooks::default());
        worker.start().await.unwrap();
        self.wait_for_worker(worker_id).await;
        worker
    }

    async fn wait_for_worker(&self, worker_id: &str) {
        for _ in 0..100 {
            if self.registry.lookup_worker(worker_id).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker '{worker_id}' never registered");
    }
}

#[tokio::test]
async fn scenario_1_unicast_add_returns_five() {
    let harness = Harness::new().await;
    let _worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::new(AtomicBool::new(false)))).await;

    let proxy = GreeterProxy::new(UnicastCaller::new(Arc::clone(&harness.registry), "w1"), DEFAULT_CALL_TIMEOUT);
    assert_eq!(proxy.add(2, 3).await.unwrap(), 5);
}

#[tokio::test]
async fn scenario_2_fire_and_forget_sets_flag_with_no_wire_reply() {
    let harness = Harness::new().await;
    let worked = Arc::new(AtomicBool::new(false));
    let _worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::clone(&worked))).await;

    // No reply is ever sent for `do_work`, so the proxy's void call only
    // completes once its own timeout fires (spec §4.10/§9 open question);
    // a short timeout here keeps the test fast rather than waiting out the
    // production 30s default.
    let proxy = GreeterProxy::new(
        UnicastCaller::new(Arc::clone(&harness.registry), "w1"),
        Duration::from_millis(100),
    );
    proxy.do_work("x".to_owned()).await.unwrap();

    assert!(worked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn scenario_3_missing_method_raises_remote_error_naming_it() {
    let harness = Harness::new().await;
    let _worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::new(AtomicBool::new(false)))).await;

    let caller = UnicastCaller::new(Arc::clone(&harness.registry), "w1");
    let request = PipeMessage::new("Nope", Payload::from_args(&[]).unwrap());

    let err = pipe_rpc::proxy::call_value::<_, i64>(&caller, request, Duration::from_secs(1))
        .await
        .unwrap_err();

    match err {
        RpcError::Remote(msg) => assert!(msg.contains("Nope")),
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_4_broadcast_with_no_workers_fails() {
    let harness = Harness::new().await;

    let caller = BroadcastCaller::new(Arc::clone(&harness.registry));
    let request = PipeMessage::new("add", Payload::from_args(&[]).unwrap());

    let err = caller.call(request, Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, RpcError::NoWorkers));
}

#[tokio::test]
async fn scenario_4b_generated_proxy_with_no_workers_yields_err_not_panic() {
    let harness = Harness::new().await;

    let proxy = GreeterProxy::new(BroadcastCaller::new(Arc::clone(&harness.registry)), Duration::from_millis(50));
    let err = proxy.add(2, 3).await.unwrap_err();
    assert!(matches!(err, RpcError::NoWorkers));
}

#[tokio::test]
async fn scenario_5_worker_exit_mid_call_fails_caller_and_later_calls() {
    let harness = Harness::new().await;
    let worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::new(AtomicBool::new(false)))).await;

    let request = PipeMessage::new(
        "add",
        Payload::from_args(&[serde_json::json!(2), serde_json::json!(3)]).unwrap(),
    );

    let registry = Arc::clone(&harness.registry);
    let in_flight = tokio::spawn(async move { registry.send_to_worker("w1", request, Duration::from_secs(5)).await });

    // Give the request a moment to land before the worker "exits".
    tokio::time::sleep(Duration::from_millis(20)).await;
    worker.stop().await;

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "expected Transport, got {err:?}");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let request = PipeMessage::new("add", Payload::from_args(&[]).unwrap());
    let err = harness
        .registry
        .send_to_worker("w1", request, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkerNotRegistered(_)));
}

#[tokio::test]
async fn scenario_6_concurrent_calls_receive_their_own_replies() {
    let harness = Harness::new().await;
    let _worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::new(AtomicBool::new(false)))).await;

    let proxy = Arc::new(GreeterProxy::new(
        UnicastCaller::new(Arc::clone(&harness.registry), "w1"),
        DEFAULT_CALL_TIMEOUT,
    ));

    let mut handles = Vec::new();
    for (a, b) in [(1, 1), (2, 2), (3, 3), (4, 4)] {
        let proxy = Arc::clone(&proxy);
        handles.push(tokio::spawn(async move { (a + b, proxy.add(a, b).await.unwrap()) }));
    }

    for handle in handles {
        let (expected, actual) = handle.await.unwrap();
        assert_eq!(expected, actual);
    }
}

#[tokio::test]
async fn broadcast_race_first_non_null_reply_wins() {
    let harness = Harness::new().await;
    let _silent = harness.spawn_worker("silent", GreeterHandler::silent(Arc::new(AtomicBool::new(false)))).await;
    let _talkative = harness
        .spawn_worker("talkative", GreeterHandler::new(Arc::new(AtomicBool::new(false))))
        .await;

    let caller = BroadcastCaller::new(Arc::clone(&harness.registry));
    let request = PipeMessage::new(
        "maybe_add",
        Payload::from_args(&[serde_json::json!(2), serde_json::json!(2)]).unwrap(),
    );

    // "silent" always answers Null; the race must not settle for that and
    // instead wait for "talkative"'s real value.
    let reply = caller.call(request, Duration::from_secs(1)).await.unwrap();
    assert!(!reply.is_null());
    assert_eq!(reply.payload.unwrap().as_value::<i64>().unwrap(), 4);
}

#[tokio::test]
async fn broadcast_race_all_null_replies_yield_none() {
    let harness = Harness::new().await;
    let _a = harness.spawn_worker("a", GreeterHandler::silent(Arc::new(AtomicBool::new(false)))).await;
    let _b = harness.spawn_worker("b", GreeterHandler::silent(Arc::new(AtomicBool::new(false)))).await;

    let caller = BroadcastCaller::new(Arc::clone(&harness.registry));
    let request = PipeMessage::new(
        "maybe_add",
        Payload::from_args(&[serde_json::json!(2), serde_json::json!(2)]).unwrap(),
    );

    let result: Option<i64> = pipe_rpc::proxy::call_value(&caller, request, Duration::from_secs(1)).await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn broadcast_race_one_error_reply_aborts_immediately() {
    let harness = Harness::new().await;
    let _worker = harness.spawn_worker("w1", GreeterHandler::new(Arc::new(AtomicBool::new(false)))).await;

    let caller = BroadcastCaller::new(Arc::clone(&harness.registry));
    let request = PipeMessage::new("Nope", Payload::from_args(&[]).unwrap());

    // The race itself returns the raw `Error` reply (the first non-Null
    // reply wins, Error included); materializing it as `RemoteError`
    // happens one layer up, in `call_value`/`call_void`.
    let err = pipe_rpc::proxy::call_value::<_, i64>(&caller, request, Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        RpcError::Remote(msg) => assert!(msg.contains("Nope")),
        other => panic!("expected Remote, got {other:?}"),
    }
}
