//! Growable buffer pool backing per-call frame buffers.
//!
//! Each byte source takes one `BytesMut` from the connection's pool when it
//! is created and hands it back once it is terminal and fully drained, so a
//! busy connection reuses allocations instead of growing a fresh buffer for
//! every call.
//!
//! # Usage
//!
//! ```
//! use muxwire::protocol::BufferPool;
//!
//! let pool = BufferPool::new(8, 4096);
//! let buf = pool.acquire();
//! assert!(buf.capacity() >= 4096);
//! pool.release(buf);
//! assert_eq!(pool.idle(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;

/// Default number of idle buffers kept per connection.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Buffers that grew beyond this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 1024 * 1024;

/// A shared pool of reusable growable buffers.
///
/// Cloning shares the same free list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<BytesMut>>>,
    max_idle: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_idle` buffers of `capacity` bytes.
    pub fn new(max_idle: usize, capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(max_idle))),
            max_idle,
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<BytesMut>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take an empty buffer from the pool, allocating if none is idle.
    pub fn acquire(&self) -> BytesMut {
        self.lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    /// Return a buffer to the pool. Its contents are discarded.
    pub fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.lock();
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }
}
