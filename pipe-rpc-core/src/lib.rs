//! Wire format for `pipe-rpc`: the message envelope, the frame codec, the
//! positional-argument payload encoding, and the protocol's error taxonomy.
//!
//! This crate has no knowledge of connections, registries, or dispatch — it
//! exists so that `pipe-rpc-macros`' generated code and `pipe-rpc`'s runtime
//! share one definition of what goes over the wire.
#![deny(unused_extern_crates)]

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{ErrorResponse, MessageId, MessageType, PipeMessage, RegisterWorkerRequest, RequestId};
pub use error::Error;
pub use payload::Payload;
