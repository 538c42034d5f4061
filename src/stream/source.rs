//! Receive side of a call.
//!
//! A [`ByteSource`] is a cursor over the frames the connection reader pushed
//! for one call. [`ByteSource::next`] is the only blocking point: it waits
//! for a frame, for the stream to close, or for a context to end. Frames that
//! arrived before the close are still handed out before end-of-stream is
//! reported.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::watch;

use super::frame_buffer::FrameBuffer;
use super::legacy::LegacyStream;
use crate::codec::Encoding;
use crate::context::{CallContext, CancelReason};
use crate::error::{MuxError, Result};
use crate::protocol::BufferPool;

#[derive(Debug, Clone)]
enum Terminal {
    EndOfStream,
    Canceled,
    Failed(Arc<MuxError>),
}

impl Terminal {
    fn from_reason(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Canceled => Terminal::Canceled,
            CancelReason::DeadlineExceeded => {
                Terminal::Failed(Arc::new(MuxError::DeadlineExceeded))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Terminal::EndOfStream => "end of stream".to_string(),
            Terminal::Canceled => MuxError::Canceled.to_string(),
            Terminal::Failed(err) => err.to_string(),
        }
    }
}

struct State {
    terminal: Option<Terminal>,
    released: bool,
}

struct Inner {
    buf: FrameBuffer,
    pool: BufferPool,
    state: Mutex<State>,
    closed: watch::Sender<bool>,
    request_id: AtomicI32,
    encoding: Encoding,
    stream_ctx: CallContext,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let released = self
            .state
            .get_mut()
            .map(|s| s.released)
            .unwrap_or_else(|e| e.into_inner().released);
        if !released {
            self.pool.release(self.buf.take_store());
        }
    }
}

/// Cloneable handle to the receive side of one call.
#[derive(Clone)]
pub struct ByteSource {
    inner: Arc<Inner>,
}

impl ByteSource {
    /// Create a source whose storage comes from `pool`.
    ///
    /// `stream_ctx` ends the stream when canceled.
    pub(crate) fn new(
        pool: &BufferPool,
        max_buffered_bytes: Option<usize>,
        encoding: Encoding,
        stream_ctx: CallContext,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                buf: FrameBuffer::new(pool.acquire(), max_buffered_bytes),
                pool: pool.clone(),
                state: Mutex::new(State {
                    terminal: None,
                    released: false,
                }),
                closed,
                request_id: AtomicI32::new(0),
                encoding,
                stream_ctx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until at least one frame can be read.
    ///
    /// Returns `false` once the stream is terminal and drained. If `ctx` ends
    /// first the failure is recorded on the source and `false` is returned
    /// even if frames are still queued.
    pub async fn next(&self, ctx: &CallContext) -> bool {
        {
            let mut state = self.lock();
            if self.inner.buf.frames() > 0 {
                return true;
            }
            if state.terminal.is_some() {
                self.release_locked(&mut state);
                return false;
            }
        }

        let more = self.inner.buf.wait_for_more();
        let mut closed = self.inner.closed.subscribe();
        let closed = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };

        tokio::select! {
            _ = more => true,
            reason = self.inner.stream_ctx.cancelled() => {
                self.finish(Terminal::from_reason(reason));
                self.has_frames()
            }
            reason = ctx.cancelled() => {
                self.finish(Terminal::from_reason(reason));
                false
            }
            _ = closed => self.has_frames(),
        }
    }

    fn has_frames(&self) -> bool {
        let mut state = self.lock();
        if self.inner.buf.frames() > 0 {
            return true;
        }
        self.release_locked(&mut state);
        false
    }

    fn release_locked(&self, state: &mut State) {
        if state.terminal.is_some() && !state.released {
            state.released = true;
            self.inner.pool.release(self.inner.buf.take_store());
        }
    }

    /// Read exactly one frame into `buf`.
    ///
    /// Fails with [`MuxError::BufferTooSmall`] if the frame does not fit; the
    /// frame stays queued in that case.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.buf.read_frame(buf)
    }

    /// Read exactly one frame.
    pub fn read_bytes(&self) -> Result<Bytes> {
        self.inner.buf.pop_frame()
    }

    /// Take every queued frame, concatenated.
    pub fn drain_buffered(&self) -> Bytes {
        self.inner.buf.drain_all()
    }

    /// Length of the next queued frame.
    pub fn peek_len(&self) -> Option<usize> {
        self.inner.buf.peek_len()
    }

    /// The error that ended this source.
    ///
    /// `None` while open, after a clean end and after cancellation. An
    /// expired deadline is reported.
    pub fn err(&self) -> Option<Arc<MuxError>> {
        match &self.lock().terminal {
            Some(Terminal::Failed(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// End the stream early.
    ///
    /// `None` ends it cleanly. Does nothing if the stream already ended, so
    /// the first error wins.
    pub fn cancel(&self, err: Option<MuxError>) {
        let terminal = match err {
            None => Terminal::EndOfStream,
            Some(MuxError::Canceled) => Terminal::Canceled,
            Some(err) => Terminal::Failed(Arc::new(err)),
        };
        self.finish(terminal);
    }

    /// End the stream with an error shared with other endpoints of the call.
    pub(crate) fn fail(&self, err: Arc<MuxError>) {
        self.finish(Terminal::Failed(err));
    }

    fn finish(&self, terminal: Terminal) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal);
        }
        self.inner.closed.send_replace(true);
    }

    /// Check whether the stream reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Push one received frame of `frame_len` bytes read from `reader`.
    pub(crate) fn consume<R: std::io::Read>(&self, frame_len: u32, reader: R) -> Result<()> {
        let state = self.lock();
        if let Some(terminal) = &state.terminal {
            return Err(MuxError::SourceClosed(terminal.describe()));
        }
        self.inner.buf.copy_body(frame_len, reader)
    }

    /// Adapt this source to the pull-style stream interface.
    pub fn as_stream(&self) -> LegacyStream {
        LegacyStream::new(self.clone())
    }

    pub fn request_id(&self) -> i32 {
        self.inner.request_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_request_id(&self, id: i32) {
        self.inner.request_id.store(id, Ordering::Release);
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("request_id", &self.request_id())
            .field("encoding", &self.inner.encoding)
            .field("frames", &self.inner.buf.frames())
            .field("terminal", &self.lock().terminal)
            .finish()
    }
}
