//! The caller-side surface the `#[rpc_interface]`-generated proxies call
//! into (spec §4.10): a single `RpcCaller::call` that a unicast proxy
//! routes to one named worker and a broadcast proxy fans out to every
//! connected worker, racing the replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use thiserror::Error;

use pipe_rpc_core::{ErrorResponse, PipeMessage};

use crate::registry_server::RegistryServer;
use crate::transport::ConnectionFactory;

/// Errors observable at a proxy call site. Wraps the protocol-level
/// [`pipe_rpc_core::Error`] taxonomy and adds the two outcomes that only
/// exist at this layer: a materialized `Error` reply, and an empty
/// broadcast.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Protocol(#[from] pipe_rpc_core::Error),

    /// Caller-side materialization of an `Error` reply (spec §4.11):
    /// carries only the remote handler's message, never a stack trace.
    #[error("remote error: {0}")]
    Remote(String),

    /// A broadcast proxy was called with zero workers currently connected.
    #[error("no workers are currently connected")]
    NoWorkers,
}

impl RpcError {
    fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Protocol(pipe_rpc_core::Error::Timeout))
    }
}

/// The single entry point every generated proxy method funnels through.
/// Implemented once per proxy flavor (unicast / broadcast); generic proxy
/// code (`#[rpc_interface]`'s output) is written against this trait so it
/// never needs to know which flavor it holds.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    async fn call(&self, request: PipeMessage, timeout: Duration) -> Result<PipeMessage, RpcError>;
}

/// Routes every call to one specific worker id (spec §4.10 "Unicast proxy").
pub struct UnicastCaller<F: ConnectionFactory> {
    registry: Arc<RegistryServer<F>>,
    worker_id: String,
}

impl<F: ConnectionFactory> UnicastCaller<F> {
    pub fn new(registry: Arc<RegistryServer<F>>, worker_id: impl Into<String>) -> Self {
        UnicastCaller { registry, worker_id: worker_id.into() }
    }
}

#[async_trait]
impl<F: ConnectionFactory + 'static> RpcCaller for UnicastCaller<F> {
    async fn call(&self, request: PipeMessage, timeout: Duration) -> Result<PipeMessage, RpcError> {
        self.registry
            .send_to_worker(&self.worker_id, request, timeout)
            .await
            .map_err(RpcError::from)
    }
}

/// Fans every call out to every currently connected worker and races the
/// replies (spec §4.10 "Broadcast proxy"). Each worker gets a *relayed*
/// envelope (fresh `MessageId`, spec §3 construction rule 3) so replies
/// correlate independently per hop.
pub struct BroadcastCaller<F: ConnectionFactory> {
    registry: Arc<RegistryServer<F>>,
}

impl<F: ConnectionFactory> BroadcastCaller<F> {
    pub fn new(registry: Arc<RegistryServer<F>>) -> Self {
        BroadcastCaller { registry }
    }
}

#[async_trait]
impl<F: ConnectionFactory + 'static> RpcCaller for BroadcastCaller<F> {
    async fn call(&self, request: PipeMessage, timeout: Duration) -> Result<PipeMessage, RpcError> {
        let worker_ids = self.registry.connected_worker_ids();
        if worker_ids.is_empty() {
            return Err(RpcError::NoWorkers);
        }

        let mut in_flight = FuturesUnordered::new();
        for worker_id in worker_ids {
            let relayed = request.relay();
            let registry = Arc::clone(&self.registry);
            in_flight.push(async move { registry.send_to_worker(&worker_id, relayed, timeout).await });
        }

        // "First useful response wins": the first non-Null reply (whether
        // a value or an Error) completes the race immediately; an all-Null
        // field of replies resolves to the last Null seen; a worker whose
        // send itself failed contributes nothing unless every worker does.
        let mut last_null = None;
        let mut last_err = None;
        while let Some(outcome) = in_flight.next().await {
            match outcome {
                Ok(reply) if reply.is_null() => last_null = Some(reply),
                Ok(reply) => return Ok(reply),
                Err(e) => last_err = Some(e),
            }
        }

        match last_null {
            Some(reply) => Ok(reply),
            None => Err(last_err.map(RpcError::from).unwrap_or(RpcError::NoWorkers)),
        }
    }
}

fn remote_message(reply: &PipeMessage) -> Result<String, RpcError> {
    let payload = reply
        .payload
        .as_ref()
        .ok_or_else(|| RpcError::Remote("Error reply carried no payload".into()))?;
    Ok(payload.as_value::<ErrorResponse>()?.message)
}

/// Drives a call whose method has no declared return value (spec §4.10
/// `R = void`): blocks until a reply arrives or the timeout fires, ignoring
/// any non-error reply. The only reply a well-behaved handler can send for
/// such a method is an `Error` (spec §4.9.4's exception path still
/// applies); since no success reply is ever sent, the timeout firing is the
/// expected, successful outcome rather than a failure (see DESIGN.md open
/// question on void proxy calls).
pub async fn call_void<C: RpcCaller>(caller: &C, request: PipeMessage, timeout: Duration) -> Result<(), RpcError> {
    match caller.call(request, timeout).await {
        Ok(reply) if reply.is_error() => Err(RpcError::Remote(remote_message(&reply)?)),
        Ok(_) => Ok(()),
        Err(e) if e.is_timeout() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Drives a call whose method declares a value return type `V` (spec
/// §4.10 `R = V` and `R = async-handle of V` — in Rust's `async fn` these
/// are the same shape, since the method is already a future the caller may
/// await whenever it likes). A `Null` reply decodes as `V::default()`.
pub async fn call_value<C, V>(caller: &C, request: PipeMessage, timeout: Duration) -> Result<V, RpcError>
where
    C: RpcCaller,
    V: DeserializeOwned + Default,
{
    let reply = caller.call(request, timeout).await?;

    if reply.is_error() {
        return Err(RpcError::Remote(remote_message(&reply)?));
    }
    if reply.is_null() {
        return Ok(V::default());
    }

    let payload = reply
        .payload
        .as_ref()
        .ok_or_else(|| RpcError::Remote("reply carried no payload".into()))?;
    Ok(payload.as_value::<V>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_rpc_core::{MessageType, Payload};
    use std::sync::Mutex;

    struct ScriptedCaller {
        replies: Mutex<Vec<PipeMessage>>,
    }

    impl ScriptedCaller {
        fn new(replies: Vec<PipeMessage>) -> Self {
            ScriptedCaller { replies: Mutex::new(replies) }
        }
    }

    #[async_trait]
    impl RpcCaller for ScriptedCaller {
        async fn call(&self, _request: PipeMessage, _timeout: Duration) -> Result<PipeMessage, RpcError> {
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn value_reply(value: i64) -> PipeMessage {
        let req = PipeMessage::new("Add", Payload::from_args(&[]).unwrap());
        req.copy_for("Add", Payload::from_value(&value).unwrap())
    }

    fn error_reply(message: &str) -> PipeMessage {
        let req = PipeMessage::new("Add", Payload::from_args(&[]).unwrap());
        req.copy_for(MessageType::Error, Payload::from_value(&ErrorResponse::new(message)).unwrap())
    }

    #[tokio::test]
    async fn call_value_decodes_a_successful_reply() {
        let caller = ScriptedCaller::new(vec![value_reply(5)]);
        let request = PipeMessage::new("Add", Payload::from_args(&[]).unwrap());

        let result: i64 = call_value(&caller, request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result, 5);
    }

    #[tokio::test]
    async fn call_value_raises_remote_error() {
        let caller = ScriptedCaller::new(vec![error_reply("Nope: method not found")]);
        let request = PipeMessage::new("Nope", Payload::from_args(&[]).unwrap());

        let err = call_value::<_, i64>(&caller, request, Duration::from_secs(1)).await.unwrap_err();
        match err {
            RpcError::Remote(msg) => assert!(msg.contains("Nope")),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_void_absorbs_timeout_as_success() {
        struct TimingOutCaller;
        #[async_trait]
        impl RpcCaller for TimingOutCaller {
            async fn call(&self, _request: PipeMessage, _timeout: Duration) -> Result<PipeMessage, RpcError> {
                Err(RpcError::Protocol(pipe_rpc_core::Error::Timeout))
            }
        }

        let request = PipeMessage::new("LogEvent", Payload::from_args(&[]).unwrap());
        call_void(&TimingOutCaller, request, Duration::from_millis(10)).await.unwrap();
    }
}
