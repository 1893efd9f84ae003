//! The `Calculator` interface shared by the `registry-demo` and
//! `worker-demo` binaries. Exercises the three call shapes spec.md §8's
//! end-to-end scenarios name: a synchronous value call (`add`), a
//! fire-and-forget call with no reply on the wire (`log_event`), and a
//! value call that can legitimately come back `Null` (`lookup`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pipe_rpc::{rpc_handler, rpc_interface};

#[rpc_interface]
#[async_trait]
pub trait Calculator: Send + Sync {
    async fn add(&self, a: i64, b: i64) -> i64;
    async fn log_event(&self, message: String);
    async fn lookup(&self, key: String) -> Option<i64>;
}

/// The worker-side implementation: an adder plus a tiny in-memory table
/// for `lookup`, seeded with one entry so the demo can show both the
/// value and the `Null` outcome of that call.
pub struct CalculatorHandler {
    memory: Mutex<HashMap<String, i64>>,
}

impl CalculatorHandler {
    pub fn new() -> Self {
        let mut memory = HashMap::new();
        memory.insert("answer".to_owned(), 42);
        CalculatorHandler {
            memory: Mutex::new(memory),
        }
    }
}

impl Default for CalculatorHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[rpc_handler]
#[async_trait]
impl Calculator for CalculatorHandler {
    async fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    async fn log_event(&self, message: String) {
        log::info!(target: "calculator_demo", "event: {message}");
    }

    async fn lookup(&self, key: String) -> Option<i64> {
        self.memory.lock().unwrap().get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_rpc::core::Payload;
    use pipe_rpc::core::PipeMessage;
    use std::sync::Arc;

    #[tokio::test]
    async fn add_dispatches_through_the_generated_method_table() {
        let handler = Arc::new(CalculatorHandler::new());
        let table = handler.into_method_table();

        let request = PipeMessage::new(
            "add",
            Payload::from_args(&[serde_json::json!(2), serde_json::json!(3)]).unwrap(),
        );
        let reply = pipe_rpc::dispatch::dispatch(&table, &request).await.unwrap();
        assert_eq!(reply.payload.unwrap().as_value::<i64>().unwrap(), 5);
    }

    #[tokio::test]
    async fn lookup_of_a_missing_key_yields_null_reply() {
        let handler = Arc::new(CalculatorHandler::new());
        let table = handler.into_method_table();

        let request = PipeMessage::new(
            "lookup",
            Payload::from_args(&[serde_json::json!("missing")]).unwrap(),
        );
        let reply = pipe_rpc::dispatch::dispatch(&table, &request).await.unwrap();
        assert!(reply.is_null());
    }

    #[tokio::test]
    async fn log_event_yields_no_reply() {
        let handler = Arc::new(CalculatorHandler::new());
        let table = handler.into_method_table();

        let request = PipeMessage::new(
            "log_event",
            Payload::from_args(&[serde_json::json!("hello")]).unwrap(),
        );
        assert!(pipe_rpc::dispatch::dispatch(&table, &request).await.is_none());
    }
}
