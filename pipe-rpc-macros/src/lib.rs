//! Code generation for `pipe-rpc`.
//!
//! The teacher this workspace was reworked from (`azure-functions-codegen`)
//! used a hand-rolled `MacroError` that switched between `proc_macro::Diagnostic`
//! (nightly-only at the time) and a plain `panic!` depending on a feature
//! flag, because `syn::Error::to_compile_error` did not yet exist on the
//! `syn` version it pinned. This crate uses `syn::Error` directly, which is
//! the same idea (a span-carrying error that becomes a compile error at the
//! call site) without the nightly/stable split.
#![deny(unused_extern_crates)]

mod handler;
mod interface;

use proc_macro::TokenStream;

/// Applied to a `pub trait` definition (normally already carrying
/// `#[async_trait::async_trait]`) to generate a proxy type with one inherent
/// method per trait method. Each proxy method builds a
/// `PipeMessage(type = method name, payload = args[])`, routes it through
/// the proxy's [`pipe_rpc::proxy::RpcCaller`], and decodes the reply
/// according to the method's declared return type, per spec §4.10. Unlike
/// the trait itself, a proxy method returns `Result<_, pipe_rpc::proxy::RpcError>`:
/// a `RemoteError`/`NoWorkers`/`Timeout` outcome (spec §4.11) is an ordinary,
/// expected call outcome, not a bug in the callee, so the proxy is a
/// standalone type rather than an `impl` of the trait (whose signatures are
/// fixed to the plain value type the worker-side handler returns).
///
/// # Example
///
/// ```ignore
/// #[rpc_interface]
/// #[async_trait]
/// pub trait Calculator: Send + Sync {
///     async fn add(&self, a: i64, b: i64) -> i64;
///     async fn log_event(&self, message: String);
/// }
/// ```
///
/// generates `CalculatorProxy<C>` with `async fn add(&self, a: i64, b: i64)
/// -> Result<i64, pipe_rpc::proxy::RpcError>` and
/// `async fn log_event(&self, message: String) -> Result<(), pipe_rpc::proxy::RpcError>`,
/// for any `C: pipe_rpc::proxy::RpcCaller`.
#[proc_macro_attribute]
pub fn rpc_interface(args: TokenStream, input: TokenStream) -> TokenStream {
    interface::expand(args, input)
}

/// Applied to an `impl SomeInterface for SomeHandler` block to generate a
/// `MethodTable` registration: one typed thunk per method that decodes the
/// request's payload as a positional argument tuple, invokes the method,
/// and wraps the result as a reply envelope, per spec §4.9.
///
/// # Example
///
/// ```ignore
/// #[rpc_handler]
/// #[async_trait]
/// impl Calculator for CalculatorHandler {
///     async fn add(&self, a: i64, b: i64) -> i64 { a + b }
///     async fn log_event(&self, message: String) { println!("{message}"); }
/// }
/// ```
#[proc_macro_attribute]
pub fn rpc_handler(args: TokenStream, input: TokenStream) -> TokenStream {
    handler::expand(args, input)
}
