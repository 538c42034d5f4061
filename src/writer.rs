//! Serialized packet writer for the shared connection.
//!
//! Every call writes through one [`PacketWriter`]. A single async mutex is
//! held for the whole header + body write, so packets of concurrent calls are
//! never interleaved on the wire.
//!
//! # Architecture
//!
//! ```text
//! Call 1 ─┐
//! Call 2 ─┼─► PacketWriter (Mutex<BoxedWriter>) ─► Connection
//! Call N ─┘
//! ```
//!
//! Header and body go out as one vectored write whenever the transport
//! accepts it in full.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{MuxError, Result};
use crate::protocol::{Packet, CLOSE_SENTINEL, HEADER_SIZE};

/// Boxed write half of the connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct WriterState {
    io: BoxedWriter,
    closed: bool,
}

/// Mutex-guarded writer shared by all calls on a connection.
pub struct PacketWriter {
    state: Mutex<WriterState>,
}

impl PacketWriter {
    /// Wrap the write half of a connection.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            state: Mutex::new(WriterState {
                io: Box::new(writer),
                closed: false,
            }),
        }
    }

    /// Write one packet (header, then body) to the connection.
    ///
    /// Fails with [`MuxError::BodyTooLarge`] if the body does not fit the
    /// length field and with [`MuxError::ConnectionClosed`] after `close`.
    /// Transport errors are returned unchanged.
    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        let header = packet.header()?.encode();

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(MuxError::ConnectionClosed);
        }

        write_parts(&mut state.io, &header, &packet.body).await?;
        state.io.flush().await?;
        Ok(())
    }

    /// Send the close sentinel and shut the transport down.
    ///
    /// A second call is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        state.io.write_all(&CLOSE_SENTINEL).await?;
        state.io.flush().await?;
        state.io.shutdown().await?;
        Ok(())
    }

    /// Check whether `close` has been called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

/// Write header and body using scatter/gather I/O, finishing partial writes.
async fn write_parts<W>(writer: &mut W, header: &[u8; HEADER_SIZE], body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total = HEADER_SIZE + body.len();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(header, body, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn remaining_slices<'a>(
    header: &'a [u8; HEADER_SIZE],
    body: &'a [u8],
    skip: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);

    if skip < HEADER_SIZE {
        slices.push(IoSlice::new(&header[skip..]));
        if !body.is_empty() {
            slices.push(IoSlice::new(body));
        }
    } else {
        let start = skip - HEADER_SIZE;
        if start < body.len() {
            slices.push(IoSlice::new(&body[start..]));
        }
    }

    slices
}
