//! A call initiated by the peer.
//!
//! Handlers answer through the call's [`ByteSink`] and read uploaded frames
//! from its [`ByteSource`]:
//! - `reply` / `reply_error` - answer an async call
//! - `sink.write` + `sink.close` - stream a source or duplex reply
//! - `source.next` + `source.read_bytes` - drain a sink or duplex upload
//!
//! # Example
//!
//! ```ignore
//! async fn whoami(call: InboundCall) {
//!     let _ = call.reply(&serde_json::json!({"id": "@abc"})).await;
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::CallContext;
use crate::error::Result;
use crate::request::{CallType, Method};
use crate::stream::{ByteSink, ByteSource};

/// Context handed to a [`Handler`](super::Handler) for one inbound call.
///
/// The sink writes with the negated request id, as replies on the wire do.
///
/// The source's encoding comes from the initiating packet, which is always
/// JSON. Handlers receiving string or binary uploads pick the decoder with
/// `source.as_stream().with_encoding(..)` or read raw frames directly.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub method: Method,
    pub kind: CallType,
    pub args: Value,
    pub source: ByteSource,
    pub sink: ByteSink,
    pub ctx: CallContext,
}

impl InboundCall {
    /// Request id chosen by the peer.
    #[inline]
    pub fn request_id(&self) -> i32 {
        -self.sink.request_id()
    }

    /// Deserialize the argument list.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.args.clone())?)
    }

    /// Answer with one JSON value.
    ///
    /// For stream calls the end packet follows the value.
    pub async fn reply<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.sink.write_json(value).await?;
        self.sink.close().await
    }

    /// Answer with an error packet.
    pub async fn reply_error(&self, message: &str) -> Result<()> {
        self.sink.close_with_error(message).await
    }
}
