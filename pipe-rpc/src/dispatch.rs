//! The runtime half of the dispatch engine (spec §4.9): the `MethodTable`
//! type the `#[rpc_handler]` macro populates with one typed thunk per
//! method, and the resolve-decode-invoke-wrap logic that turns an inbound
//! request into a reply envelope.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use pipe_rpc_core::{Error, ErrorResponse, MessageType, Payload, PipeMessage};

/// The future a registered thunk returns: the decoded, invoked, re-encoded
/// result of one method call, or the error that aborted it before a reply
/// could be produced.
pub type ThunkFuture = Pin<Box<dyn Future<Output = Result<Option<Payload>, Error>> + Send>>;

/// One typed call-site generated by `#[rpc_handler]`: decode the request's
/// payload positionally, invoke the bound method, re-encode its result (or
/// `None` for a method with no declared return value).
pub type Thunk = Box<dyn Fn(Option<Payload>) -> ThunkFuture + Send + Sync>;

/// Maps method names (matched case-insensitively, per spec §4.9 step 1) to
/// the thunks `#[rpc_handler]` registered for a handler's methods.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Thunk>,
}

impl MethodTable {
    pub fn new() -> Self {
        MethodTable { methods: HashMap::new() }
    }

    pub fn register<F>(&mut self, name: &str, thunk: F)
    where
        F: Fn(Option<Payload>) -> ThunkFuture + Send + Sync + 'static,
    {
        self.methods.insert(name.to_ascii_lowercase(), Box::new(thunk));
    }

    pub fn lookup(&self, name: &str) -> Option<&Thunk> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Resolves `request.Type` against `table`, decodes its payload, invokes
/// the matching method, and shapes the reply per spec §4.9:
///
/// - no method matches → `Error` reply naming the missing method.
/// - payload decoding fails → `Error` reply carrying the decoder's message.
/// - the method has no declared return value → no reply at all.
/// - the method returns a value that serializes to JSON `null` → a `Null`
///   reply (distinguishes "handler ran, returned nothing" from "handler
///   did not reply at all").
/// - otherwise → a reply of `Type = request.Type` carrying the value.
///
/// The invocation runs on its own `tokio::spawn`ed task so a panicking
/// handler is caught at the `JoinHandle` rather than unwinding into the
/// connection's listen loop — the async analogue of the teacher's
/// `catch_unwind`-around-the-invoker shape, reified here as "a panic
/// becomes an `Error` reply" rather than "a panic becomes a `Failure`
/// status" (spec §4.9 step 4: "any exception thrown" covers a handler
/// panic the same as a returned error).
pub async fn dispatch(table: &MethodTable, request: &PipeMessage) -> Option<PipeMessage> {
    let method_name = match &request.ty {
        MessageType::Method(name) => name.clone(),
        other => return Some(error_reply(request, format!("method not found: {other}"))),
    };

    let Some(thunk) = table.lookup(&method_name) else {
        return Some(error_reply(request, format!("method not found: {method_name}")));
    };

    let invocation = thunk(request.payload.clone());
    match tokio::spawn(invocation).await {
        Ok(Ok(None)) => None,
        Ok(Ok(Some(payload))) if payload.as_bytes() == b"null" => {
            Some(request.copy_for(MessageType::Null, payload))
        }
        Ok(Ok(Some(payload))) => Some(request.copy_for(MessageType::Method(method_name), payload)),
        Ok(Err(e)) => {
            log::error!(target: "pipe_rpc::dispatch", "handler for '{method_name}' failed: {e}");
            Some(error_reply(request, e.to_string()))
        }
        Err(join_err) => {
            let message = panic_message(join_err);
            log::error!(target: "pipe_rpc::dispatch", "handler for '{method_name}' panicked: {message}");
            Some(error_reply(request, message))
        }
    }
}

/// Extracts a human-readable message out of a `JoinError`, distinguishing a
/// caught panic (the common case) from the task having been cancelled out
/// from under it (which can't happen here today, since nothing aborts an
/// in-flight dispatch, but is handled rather than unwrapped).
fn panic_message(join_err: tokio::task::JoinError) -> String {
    if !join_err.is_panic() {
        return "handler task was cancelled".to_owned();
    }

    let payload = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

fn error_reply(request: &PipeMessage, message: String) -> PipeMessage {
    let payload = Payload::from_value(&ErrorResponse::new(message))
        .expect("ErrorResponse always serializes");
    request.copy_for(MessageType::Error, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_table() -> MethodTable {
        let mut table = MethodTable::new();
        table.register("Add", |payload| {
            Box::pin(async move {
                let elements = payload.unwrap().as_tuple_elements(2)?;
                let a: i64 = Payload::decode_element(&elements, 0)?;
                let b: i64 = Payload::decode_element(&elements, 1)?;
                Ok(Some(Payload::from_value(&(a + b))?))
            })
        });
        table.register("LogEvent", |_payload| Box::pin(async move { Ok(None) }));
        table.register("MaybeFind", |_payload| {
            Box::pin(async move { Ok(Some(Payload::from_value::<Option<i64>>(&None)?)) })
        });
        table.register("Boom", |_payload| {
            Box::pin(async move {
                panic!("handler exploded");
                #[allow(unreachable_code)]
                Ok(None)
            })
        });
        table
    }

    #[tokio::test]
    async fn dispatch_invokes_matching_method_case_insensitively() {
        let table = add_table();
        let request = PipeMessage::new(
            "add",
            Payload::from_args(&[serde_json::json!(2), serde_json::json!(3)]).unwrap(),
        );

        let reply = dispatch(&table, &request).await.unwrap();
        assert_eq!(reply.message_id(), request.message_id());
        assert_eq!(reply.payload.unwrap().as_value::<i64>().unwrap(), 5);
    }

    #[tokio::test]
    async fn unknown_method_yields_error_naming_it() {
        let table = add_table();
        let request = PipeMessage::new("Nope", Payload::from_args(&[]).unwrap());

        let reply = dispatch(&table, &request).await.unwrap();
        assert!(reply.is_error());
        let msg = reply.payload.unwrap().as_value::<ErrorResponse>().unwrap().message;
        assert!(msg.contains("Nope"));
    }

    #[tokio::test]
    async fn void_method_yields_no_reply() {
        let table = add_table();
        let request = PipeMessage::new(
            "LogEvent",
            Payload::from_args(&[serde_json::json!("hello")]).unwrap(),
        );
        assert!(dispatch(&table, &request).await.is_none());
    }

    #[tokio::test]
    async fn value_method_returning_none_yields_null_reply() {
        let table = add_table();
        let request = PipeMessage::new("MaybeFind", Payload::from_args(&[]).unwrap());

        let reply = dispatch(&table, &request).await.unwrap();
        assert!(reply.is_null());
    }

    #[tokio::test]
    async fn arity_mismatch_yields_error_reply() {
        let table = add_table();
        let request = PipeMessage::new(
            "Add",
            Payload::from_args(&[serde_json::json!(2)]).unwrap(),
        );

        let reply = dispatch(&table, &request).await.unwrap();
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn handler_panic_becomes_an_error_reply_not_a_dead_connection() {
        let table = add_table();
        let request = PipeMessage::new("Boom", Payload::from_args(&[]).unwrap());

        let reply = dispatch(&table, &request).await.unwrap();
        assert!(reply.is_error());
        let msg = reply.payload.unwrap().as_value::<ErrorResponse>().unwrap().message;
        assert!(msg.contains("handler exploded"));
    }
}
