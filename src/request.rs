//! Call envelopes and the per-connection request table.
//!
//! Locally initiated calls get strictly increasing positive ids. Their
//! replies arrive with the negated id. Calls initiated by the peer are keyed
//! by the peer's id in a separate map, since both sides count from 1.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::context::CallContext;
use crate::error::{MuxError, Result};
use crate::protocol::Flag;
use crate::stream::{ByteSink, ByteSource};

/// Call pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// One request, one reply.
    #[default]
    Async,
    /// The callee streams frames back.
    Source,
    /// The caller streams frames up.
    Sink,
    /// Both directions stream.
    Duplex,
}

impl CallType {
    pub fn is_stream(self) -> bool {
        !matches!(self, CallType::Async)
    }

    /// Flag of the initiating packet.
    pub fn flags(self) -> Flag {
        if self.is_stream() {
            Flag::JSON | Flag::STREAM
        } else {
            Flag::JSON
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallType::Async => "async",
            CallType::Source => "source",
            CallType::Sink => "sink",
            CallType::Duplex => "duplex",
        };
        f.write_str(name)
    }
}

/// Dotted method name, sent as a list of segments.
///
/// ```
/// use muxwire::Method;
///
/// let method = Method::from("blobs.get");
/// assert_eq!(method.segments(), ["blobs", "get"]);
/// assert_eq!(method.to_string(), "blobs.get");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Method(Vec<String>);

impl Method {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Self(name.split('.').map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Method {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<&[&str]> for Method {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Body of an initiating packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub name: Method,
    #[serde(rename = "type", default)]
    pub kind: CallType,
    #[serde(default)]
    pub args: Value,
}

/// One multiplexed call and its endpoints.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub(crate) method: Method,
    pub(crate) kind: CallType,
    pub(crate) source: ByteSource,
    pub(crate) sink: ByteSink,
    pub(crate) ctx: CallContext,
}

impl Request {
    /// Fail the call locally and stop its context.
    pub(crate) fn abort(&self, err: MuxError) {
        self.source.cancel(Some(err));
        self.ctx.cancel();
    }
}

struct TableState {
    highest: i32,
    outbound: HashMap<i32, Request>,
    inbound: HashMap<i32, Request>,
    closed: bool,
}

/// Active calls of one connection.
pub(crate) struct RequestTable {
    state: Mutex<TableState>,
}

impl RequestTable {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                highest: 0,
                outbound: HashMap::new(),
                inbound: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next id for `request`, register it and encode its
    /// initiating body.
    pub(crate) fn register_outbound(&self, request: &Request, args: Value) -> Result<(i32, Vec<u8>)> {
        let mut state = self.lock();
        if state.closed {
            return Err(MuxError::ConnectionClosed);
        }

        let body = JsonCodec::encode(&CallEnvelope {
            name: request.method.clone(),
            kind: request.kind,
            args,
        })?;

        let id = state
            .highest
            .checked_add(1)
            .ok_or(MuxError::RequestIdsExhausted)?;
        state.highest = id;

        request.source.set_request_id(id);
        request.sink.set_request_id(id);
        state.outbound.insert(id, request.clone());
        Ok((id, body))
    }

    /// Track a call initiated by the peer under its id.
    pub(crate) fn register_inbound(&self, id: i32, request: &Request) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(MuxError::ConnectionClosed);
        }
        state.inbound.insert(id, request.clone());
        Ok(())
    }

    pub(crate) fn outbound(&self, id: i32) -> Option<Request> {
        self.lock().outbound.get(&id).cloned()
    }

    pub(crate) fn inbound(&self, id: i32) -> Option<Request> {
        self.lock().inbound.get(&id).cloned()
    }

    pub(crate) fn remove_outbound(&self, id: i32) -> Option<Request> {
        self.lock().outbound.remove(&id)
    }

    pub(crate) fn remove_inbound(&self, id: i32) -> Option<Request> {
        self.lock().inbound.remove(&id)
    }

    /// Reject new calls and hand back everything still registered.
    pub(crate) fn close(&self) -> Vec<Request> {
        let mut state = self.lock();
        state.closed = true;
        let mut drained: Vec<Request> = state.outbound.drain().map(|(_, r)| r).collect();
        drained.extend(state.inbound.drain().map(|(_, r)| r));
        drained
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        let state = self.lock();
        state.outbound.len() + state.inbound.len()
    }

    #[cfg(test)]
    fn set_highest(&self, highest: i32) {
        self.lock().highest = highest;
    }
}
