//! Per-call frame buffer.
//!
//! Frames are stored back to back in one growable buffer, each prefixed with
//! its length as a 4-byte little-endian integer:
//!
//! ```text
//! ┌─────────┬─────────────┬─────────┬─────────────┬───
//! │ len LE  │ frame bytes │ len LE  │ frame bytes │ ...
//! └─────────┴─────────────┴─────────┴─────────────┴───
//! ```
//!
//! A buffer belongs to exactly one byte source, so at most one consumer may
//! be parked on it at a time. Registering a second live waiter panics.

use std::io::Read;
use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::error::{MuxError, Result};

const LEN_PREFIX: usize = 4;

struct Inner {
    store: BytesMut,
    frames: u32,
    waiting: Option<oneshot::Sender<()>>,
}

/// Length-framed accumulation buffer with a single-waiter wake-up slot.
pub(crate) struct FrameBuffer {
    inner: Mutex<Inner>,
    max_bytes: Option<usize>,
}

impl FrameBuffer {
    /// Wrap `store`, optionally refusing to grow past `max_bytes`.
    pub(crate) fn new(store: BytesMut, max_bytes: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                frames: 0,
                waiting: None,
            }),
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of unread frames.
    pub(crate) fn frames(&self) -> u32 {
        self.lock().frames
    }

    /// Append one frame by copying exactly `frame_len` bytes from `reader`.
    ///
    /// A short copy or a read error leaves the buffer as it was. On success a
    /// parked waiter is woken.
    pub(crate) fn copy_body<R: Read>(&self, frame_len: u32, reader: R) -> Result<()> {
        let mut inner = self.lock();

        if let Some(limit) = self.max_bytes {
            if inner.store.len() + LEN_PREFIX + frame_len as usize > limit {
                return Err(MuxError::BufferLimit { limit });
            }
        }

        let start = inner.store.len();
        inner.store.reserve(LEN_PREFIX + frame_len as usize);
        inner.store.put_u32_le(frame_len);

        let copied = {
            let mut sink = (&mut inner.store).writer();
            std::io::copy(&mut reader.take(u64::from(frame_len)), &mut sink)
        };
        let copied = match copied {
            Ok(n) => n,
            Err(e) => {
                inner.store.truncate(start);
                return Err(e.into());
            }
        };

        if copied != u64::from(frame_len) {
            inner.store.truncate(start);
            return Err(MuxError::ShortBody {
                expected: frame_len,
                copied,
            });
        }

        inner.frames += 1;
        if let Some(waiter) = inner.waiting.take() {
            let _ = waiter.send(());
        }
        Ok(())
    }

    /// Get a receiver that resolves once a frame is available.
    ///
    /// Resolves immediately if a frame is already queued.
    ///
    /// # Panics
    ///
    /// Panics if another waiter is still registered and alive.
    pub(crate) fn wait_for_more(&self) -> oneshot::Receiver<()> {
        let mut inner = self.lock();
        let (tx, rx) = oneshot::channel();

        if inner.frames > 0 {
            let _ = tx.send(());
            return rx;
        }

        if let Some(existing) = &inner.waiting {
            if !existing.is_closed() {
                panic!("muxwire: frame buffer already has a waiter");
            }
        }
        inner.waiting = Some(tx);
        rx
    }

    /// Length of the oldest frame, if any.
    pub(crate) fn peek_len(&self) -> Option<usize> {
        let inner = self.lock();
        peek_len(&inner.store)
    }

    /// Copy the oldest frame into `dst` and drop it from the buffer.
    ///
    /// If `dst` is too small the frame stays queued.
    pub(crate) fn read_frame(&self, dst: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        let len = peek_len(&inner.store).ok_or(MuxError::EmptyBuffer)?;

        if dst.len() < len {
            return Err(MuxError::BufferTooSmall {
                needed: len,
                available: dst.len(),
            });
        }

        inner.store.advance(LEN_PREFIX);
        inner.store.copy_to_slice(&mut dst[..len]);
        inner.frames -= 1;
        Ok(len)
    }

    /// Remove and return the oldest frame.
    pub(crate) fn pop_frame(&self) -> Result<Bytes> {
        let mut inner = self.lock();
        let len = peek_len(&inner.store).ok_or(MuxError::EmptyBuffer)?;

        inner.store.advance(LEN_PREFIX);
        let frame = inner.store.split_to(len).freeze();
        inner.frames -= 1;
        Ok(frame)
    }

    /// Remove every queued frame, concatenated.
    pub(crate) fn drain_all(&self) -> Bytes {
        let mut inner = self.lock();
        let mut out = BytesMut::with_capacity(inner.store.len());
        while let Some(len) = peek_len(&inner.store) {
            inner.store.advance(LEN_PREFIX);
            out.extend_from_slice(&inner.store[..len]);
            inner.store.advance(len);
            inner.frames -= 1;
        }
        out.freeze()
    }

    /// Detach the backing storage, leaving an empty buffer.
    pub(crate) fn take_store(&self) -> BytesMut {
        let mut inner = self.lock();
        inner.frames = 0;
        std::mem::take(&mut inner.store)
    }
}

fn peek_len(store: &BytesMut) -> Option<usize> {
    if store.len() < LEN_PREFIX {
        return None;
    }
    let len = u32::from_le_bytes([store[0], store[1], store[2], store[3]]) as usize;
    Some(len)
}
