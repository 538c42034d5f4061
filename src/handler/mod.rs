//! Handler module - answering calls initiated by the peer.
//!
//! Provides:
//! - [`Handler`] - decides what to do with an inbound call
//! - [`InboundCall`] - the call's method, arguments and endpoints
//!
//! Method lookup is left to the handler. Any closure
//! `Fn(InboundCall) -> impl Future<Output = ()>` is a handler.
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{InboundCall, Rpc};
//!
//! let rpc = Rpc::builder()
//!     .handler(|call: InboundCall| async move {
//!         match call.method.to_string().as_str() {
//!             "whoami" => { let _ = call.reply(&serde_json::json!({"id": "@abc"})).await; }
//!             other => { let _ = call.reply_error(&format!("no such method: {}", other)).await; }
//!         }
//!     })
//!     .start(reader, writer);
//! ```

mod call;

use std::future::Future;
use std::pin::Pin;

pub use call::InboundCall;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for inbound call handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call. Runs on its own task.
    fn call(&self, call: InboundCall) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Handler for F
where
    F: Fn(InboundCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, call: InboundCall) -> BoxFuture<'static, ()> {
        Box::pin((self)(call))
    }
}
