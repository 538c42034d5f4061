//! Send side of a call.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;

use crate::codec::{Encoding, JsonCodec, END_BODY};
use crate::context::CallContext;
use crate::error::{MuxError, Result};
use crate::protocol::{Flag, Packet};
use crate::writer::PacketWriter;

struct State {
    encoding: Encoding,
    closed: bool,
    failure: Option<Arc<MuxError>>,
}

struct Inner {
    writer: Arc<PacketWriter>,
    ctx: CallContext,
    state: Mutex<State>,
    request_id: AtomicI32,
    stream: bool,
}

/// Cloneable handle to the send side of one call.
///
/// Every frame is written as its own packet, stamped with this sink's request
/// id and encoding. Stream sinks also carry [`Flag::STREAM`].
#[derive(Clone)]
pub struct ByteSink {
    inner: Arc<Inner>,
}

impl ByteSink {
    pub(crate) fn new(
        writer: Arc<PacketWriter>,
        ctx: CallContext,
        encoding: Encoding,
        stream: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer,
                ctx,
                state: Mutex::new(State {
                    encoding,
                    closed: false,
                    failure: None,
                }),
                request_id: AtomicI32::new(0),
                stream,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flag_for(&self, encoding: Encoding) -> Flag {
        if self.inner.stream {
            encoding.flag().set(Flag::STREAM)
        } else {
            encoding.flag()
        }
    }

    fn check_open(&self) -> Result<Encoding> {
        let state = self.lock();
        if state.closed {
            return Err(match &state.failure {
                Some(err) => MuxError::Source(err.clone()),
                None => MuxError::SinkClosed,
            });
        }
        if let Some(reason) = self.inner.ctx.reason() {
            return Err(reason.into());
        }
        Ok(state.encoding)
    }

    /// Write one frame using the sink's current encoding.
    pub async fn write(&self, frame: impl Into<Bytes>) -> Result<()> {
        let encoding = self.check_open()?;
        let packet = Packet::new(self.flag_for(encoding), self.request_id(), frame);
        self.inner.writer.write_packet(&packet).await
    }

    /// Write one JSON-encoded frame, flagged as JSON regardless of the sink's
    /// encoding.
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.check_open()?;
        let body = JsonCodec::encode(value)?;
        let packet = Packet::new(self.flag_for(Encoding::Json), self.request_id(), body);
        self.inner.writer.write_packet(&packet).await
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }

    /// Send the end-of-stream packet.
    ///
    /// Async sinks have no end packet, so this only marks them closed. A
    /// second close does nothing.
    pub async fn close(&self) -> Result<()> {
        if !self.mark_closed() || !self.inner.stream {
            return Ok(());
        }
        let packet = Packet::new(
            self.flag_for(Encoding::Json) | Flag::END_ERR,
            self.request_id(),
            Bytes::from_static(END_BODY),
        );
        self.inner.writer.write_packet(&packet).await
    }

    /// End the call with an error packet carrying `message`.
    pub async fn close_with_error(&self, message: &str) -> Result<()> {
        if !self.mark_closed() {
            return Ok(());
        }
        let body = JsonCodec::encode_error(message)?;
        let packet = Packet::new(
            self.flag_for(Encoding::Json) | Flag::END_ERR,
            self.request_id(),
            body,
        );
        self.inner.writer.write_packet(&packet).await
    }

    /// Keep the error the peer ended the call with.
    ///
    /// Later writes fail with it instead of [`MuxError::SinkClosed`]. The
    /// first error wins.
    pub(crate) fn record_error(&self, err: Arc<MuxError>) {
        let mut state = self.lock();
        if state.failure.is_none() {
            state.failure = Some(err);
        }
    }

    /// The error the peer ended the call with, if any.
    pub fn err(&self) -> Option<Arc<MuxError>> {
        self.lock().failure.clone()
    }

    /// Change the encoding of frames written from now on.
    pub fn set_encoding(&self, encoding: Encoding) {
        self.lock().encoding = encoding;
    }

    pub fn encoding(&self) -> Encoding {
        self.lock().encoding
    }

    pub fn request_id(&self) -> i32 {
        self.inner.request_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_request_id(&self, id: i32) {
        self.inner.request_id.store(id, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for ByteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSink")
            .field("request_id", &self.request_id())
            .field("stream", &self.inner.stream)
            .field("closed", &self.is_closed())
            .finish()
    }
}
