//! # muxwire
//!
//! Multiplexed RPC transport compatible with the muxrpc packet stream.
//!
//! Many concurrent calls, and their streamed bodies, share one ordered byte
//! connection. Every packet carries a request id. Locally initiated calls use
//! positive ids and the peer answers with the negated id.
//!
//! ## Architecture
//!
//! - **Packet codec** ([`protocol`]): 9-byte header + body, close sentinel
//! - **Streams** ([`stream`]): per-call [`ByteSource`] / [`ByteSink`]
//! - **Dispatcher** ([`Rpc`]): request ids, call patterns, the read loop
//!
//! ## Example
//!
//! ```ignore
//! use muxwire::{CallContext, Encoding, Json, Rpc};
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:8008").await?;
//!     let (reader, writer) = stream.into_split();
//!     let rpc = Rpc::builder().start(reader, writer);
//!
//!     let ctx = CallContext::background();
//!     let Json(who): Json<serde_json::Value> =
//!         rpc.async_call(&ctx, Encoding::Json, "whoami", &()).await?;
//!     println!("{}", who["id"]);
//!
//!     rpc.terminate().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod stream;

mod client;
mod context;
mod request;
mod writer;

pub use client::{Rpc, RpcBuilder, RpcConfig};
pub use codec::{Encoding, Json, Reply};
pub use context::{CallContext, CancelReason};
pub use error::{MuxError, Result};
pub use handler::{Handler, InboundCall};
pub use request::{CallEnvelope, CallType, Method};
pub use stream::{ByteSink, ByteSource, Item, LegacyStream};
pub use writer::PacketWriter;
