//! The pending-response table: the RPC demultiplexer that lets many
//! concurrent callers share one duplex connection. Spec §4.4.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use pipe_rpc_core::{Error, MessageId, PipeMessage};

/// Maps an in-flight request's `MessageId` to the oneshot it will complete.
/// Safe under concurrent readers and writers; `complete`/`fail` never block.
pub struct PendingResponseTable {
    waiters: DashMap<MessageId, oneshot::Sender<Result<PipeMessage, Error>>>,
}

impl PendingResponseTable {
    pub fn new() -> Self {
        PendingResponseTable {
            waiters: DashMap::new(),
        }
    }

    /// Registers a waiter for `request.message_id()` and blocks until a
    /// matching `complete`/`fail` call, or until `timeout` elapses.
    ///
    /// Callers MUST register the waiter before writing `request`'s frame —
    /// a reply can otherwise arrive and be dropped before anyone is
    /// listening for it (spec §5).
    pub async fn wait(&self, request: &PipeMessage, timeout: Duration) -> Result<PipeMessage, Error> {
        let message_id = request
            .message_id()
            .ok_or_else(|| Error::Protocol("request has no MessageId to correlate on".into()))?;

        let (tx, rx) = oneshot::channel();
        match self.waiters.entry(message_id) {
            Entry::Occupied(_) => return Err(Error::DuplicatePending(message_id.into())),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let outcome = tokio::select! {
            received = rx => received.unwrap_or(Err(Error::Cancelled)),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        };

        // Removed unconditionally: a timeout leaves a now-orphaned sender
        // behind otherwise, and a `complete`/`fail` call already removed it.
        self.waiters.remove(&message_id);
        outcome
    }

    /// Resolves the waiter for `response.message_id()`, if any, with
    /// `response`. Returns whether a waiter was found — the caller treats
    /// `false` as "this was an unsolicited message, not a reply."
    pub fn complete(&self, response: PipeMessage) -> bool {
        let Some(message_id) = response.message_id() else {
            return false;
        };

        match self.waiters.remove(&message_id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Rejects the waiter for `request.message_id()`, if any, with `err`.
    /// No-op if there is no such waiter.
    pub fn fail(&self, request: &PipeMessage, err: Error) {
        let Some(message_id) = request.message_id() else {
            return;
        };

        if let Some((_, tx)) = self.waiters.remove(&message_id) {
            let _ = tx.send(Err(err));
        }
    }

    /// Rejects the waiter for `message_id`, if any, with `err`. Like
    /// [`fail`], but keyed directly by `MessageId` for callers (the
    /// registry's per-connection teardown) that track in-flight ids
    /// without holding the original request envelope.
    pub fn fail_by_id(&self, message_id: MessageId, err: Error) {
        if let Some((_, tx)) = self.waiters.remove(&message_id) {
            let _ = tx.send(Err(err));
        }
    }

    /// Rejects every currently registered waiter with `reason` wrapped as
    /// [`Error::Transport`] (a mid-flight disconnect — read-loop EOF/reset —
    /// is a transport failure per spec §4.11/§8 scenario 5, not a
    /// routing-time [`Error::ConnectionGone`]). Used when a connection dies
    /// and every request in flight on it must fail promptly rather than
    /// wait out its timeout.
    pub fn fail_all(&self, reason: &str) {
        let keys: Vec<MessageId> = self.waiters.iter().map(|entry| *entry.key()).collect();
        for message_id in keys {
            if let Some((_, tx)) = self.waiters.remove(&message_id) {
                let err = Error::Transport(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, reason.to_owned()));
                let _ = tx.send(Err(err));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

impl Default for PendingResponseTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_rpc_core::Payload;
    use std::sync::Arc;

    fn add_request() -> PipeMessage {
        PipeMessage::new("Add", Payload::from_args(&[serde_json::json!(2), serde_json::json!(3)]).unwrap())
    }

    #[tokio::test]
    async fn complete_resolves_the_matching_waiter() {
        let table = Arc::new(PendingResponseTable::new());
        let request = add_request();
        let reply = request.copy_for("Add", Payload::from_value(&5).unwrap());

        let waiting = {
            let table = Arc::clone(&table);
            let request = request.clone();
            tokio::spawn(async move { table.wait(&request, Duration::from_secs(1)).await })
        };

        // Give the waiter a moment to register before completing it.
        tokio::task::yield_now().await;
        assert!(table.complete(reply.clone()));

        let resolved = waiting.await.unwrap().unwrap();
        assert_eq!(resolved.message_id(), reply.message_id());
    }

    #[tokio::test]
    async fn complete_with_no_waiter_returns_false() {
        let table = PendingResponseTable::new();
        let reply = add_request();
        assert!(!table.complete(reply));
    }

    #[tokio::test]
    async fn second_wait_on_same_message_id_is_duplicate_pending() {
        let table = Arc::new(PendingResponseTable::new());
        let request = add_request();

        let table2 = Arc::clone(&table);
        let request2 = request.clone();
        let first = tokio::spawn(async move { table2.wait(&request2, Duration::from_millis(200)).await });
        tokio::task::yield_now().await;

        let err = table.wait(&request, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePending(_)));

        first.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_removes_its_entry() {
        let table = PendingResponseTable::new();
        let request = add_request();

        let result = table.wait(&request, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(table.is_empty());

        // A late completion after the timeout is simply dropped.
        let reply = request.copy_for("Add", Payload::from_value(&5).unwrap());
        assert!(!table.complete(reply));
    }

    #[tokio::test]
    async fn fail_rejects_the_matching_waiter() {
        let table = Arc::new(PendingResponseTable::new());
        let request = add_request();

        let table2 = Arc::clone(&table);
        let request2 = request.clone();
        let waiting = tokio::spawn(async move { table2.wait(&request2, Duration::from_secs(1)).await });
        tokio::task::yield_now().await;

        table.fail(&request, Error::ConnectionGone("worker exited".into()));
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionGone(_)));
    }
}
