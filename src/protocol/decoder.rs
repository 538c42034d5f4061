//! Incremental packet decoder for the connection read side.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented packets:
//! - `WaitingForHeader`: Need at least 9 bytes
//! - `WaitingForBody`: Header parsed, need N more body bytes
//! - `Closed`: The close sentinel was seen; further input is ignored
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{build_packet, Flag, Packet, PacketDecoder};
//!
//! let mut decoder = PacketDecoder::new();
//! let bytes = build_packet(&Packet::new(Flag::JSON, -1, "true")).unwrap();
//!
//! let packets = decoder.push(&bytes).unwrap();
//! assert_eq!(packets.len(), 1);
//! assert_eq!(packets[0].req, -1);
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use super::Packet;
use crate::error::Result;

#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForBody { header: Header },
    Closed,
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct PacketDecoder {
    buffer: BytesMut,
    state: State,
    max_body_size: u32,
}

impl PacketDecoder {
    /// Create a new decoder with default settings.
    ///
    /// Default capacity: 64KB, max body: 16MB.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new decoder with a custom max body size.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Push data into the decoder and extract all complete packets.
    ///
    /// Partial data is buffered internally for the next push. Once the close
    /// sentinel has been decoded the remaining input is discarded.
    ///
    /// # Errors
    ///
    /// Returns error if a body exceeds `max_body_size`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        if self.is_closed() {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn try_extract_one(&mut self) -> Result<Option<Packet>> {
        loop {
            match &self.state {
                State::Closed => return Ok(None),

                State::WaitingForHeader => {
                    let header = match Header::decode(&self.buffer) {
                        Some(header) => header,
                        None => return Ok(None),
                    };
                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if header.is_close_sentinel() {
                        self.state = State::Closed;
                        self.buffer.clear();
                        return Ok(None);
                    }

                    header.validate(self.max_body_size)?;
                    self.state = State::WaitingForBody { header };
                }

                State::WaitingForBody { header } => {
                    let needed = header.body_length as usize;
                    if self.buffer.len() < needed {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(needed).freeze();
                    let header = *header;
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Packet {
                        flag: header.flag,
                        req: header.request_id,
                        body,
                    }));
                }
            }
        }
    }

    /// Check if the peer sent the close sentinel.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
            State::Closed => "Closed",
        }
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}
