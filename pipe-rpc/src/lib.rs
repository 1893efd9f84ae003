//! A local inter-process RPC fabric: a single **registry** process accepts
//! connections from zero or more **worker** processes, each of which
//! registers under a unique id and then serves requests addressed to it by
//! name. The registry can unicast a request to one named worker and await
//! its reply, or broadcast a request to every connected worker and race the
//! replies.
//!
//! Application code never touches [`core::PipeMessage`] directly. It writes
//! a plain `#[async_trait] trait` describing an interface, annotates it with
//! [`rpc_interface`] to get a generated proxy, and annotates a handler's
//! `impl` of that trait with [`rpc_handler`] to get a [`dispatch::MethodTable`]
//! registration. The two servers in this crate ([`registry_server`] and
//! [`worker_server`]) wire those proxies and method tables to an actual
//! transport.
#![deny(unused_extern_crates)]

pub mod connection;
pub mod dispatch;
pub mod pending;
pub mod proxy;
pub mod registry_server;
pub mod transport;
pub mod worker_registry;
pub mod worker_server;

/// Re-export of the wire-format crate under the path the `#[rpc_interface]`
/// and `#[rpc_handler]` macros generate references to
/// (`::pipe_rpc::core::...`), so a crate using those macros only needs a
/// dependency on `pipe-rpc`, not on `pipe-rpc-core` directly.
pub mod core {
    pub use pipe_rpc_core::*;
}

pub use pipe_rpc_macros::{rpc_handler, rpc_interface};

pub use connection::Connection;
pub use pending::PendingResponseTable;
pub use registry_server::RegistryServer;
pub use worker_registry::WorkerRegistry;
pub use worker_server::WorkerServer;
