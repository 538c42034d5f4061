//! Packet struct with typed accessors.
//!
//! Represents one wire unit with header fields and body.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{Flag, Packet};
//! use bytes::Bytes;
//!
//! let packet = Packet::new(Flag::JSON, 42, Bytes::from_static(b"true"));
//!
//! assert_eq!(packet.request_id(), 42);
//! assert_eq!(packet.body(), b"true");
//! ```

use bytes::Bytes;

use super::wire_format::{Flag, Header, HEADER_SIZE};
use crate::error::{MuxError, Result};

/// A complete protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Flags byte.
    pub flag: Flag,
    /// Request id (negative for replies).
    pub req: i32,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(flag: Flag, req: i32, body: impl Into<Bytes>) -> Self {
        Self {
            flag,
            req,
            body: body.into(),
        }
    }

    /// Build the header for this packet.
    ///
    /// Fails if the body does not fit the 32-bit length field.
    pub fn header(&self) -> Result<Header> {
        let len = u32::try_from(self.body.len())
            .map_err(|_| MuxError::BodyTooLarge(self.body.len()))?;
        Ok(Header::new(self.flag, len, self.req))
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    #[inline]
    pub fn request_id(&self) -> i32 {
        self.req
    }

    /// Check if this is the end or error marker of a call.
    #[inline]
    pub fn is_end_err(&self) -> bool {
        self.flag.get(Flag::END_ERR)
    }

    /// Check if this packet belongs to a stream.
    #[inline]
    pub fn is_stream(&self) -> bool {
        self.flag.get(Flag::STREAM)
    }

    /// Check if this is a reply to a locally initiated call.
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.req < 0
    }
}

/// Build a complete packet as a single byte vector.
///
/// ```
/// use muxwire::protocol::{build_packet, Flag, Packet};
///
/// let bytes = build_packet(&Packet::new(Flag::STRING, 1, "hi")).unwrap();
/// assert_eq!(bytes.len(), 9 + 2);
/// ```
pub fn build_packet(packet: &Packet) -> Result<Vec<u8>> {
    let header = packet.header()?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + packet.body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&packet.body);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_creation() {
        let packet = Packet::new(Flag::JSON | Flag::STREAM, -3, Bytes::from_static(b"[1]"));

        assert_eq!(packet.request_id(), -3);
        assert_eq!(packet.body(), b"[1]");
        assert_eq!(packet.body_len(), 3);
        assert!(packet.is_stream());
        assert!(packet.is_reply());
        assert!(!packet.is_end_err());
    }

    #[test]
    fn test_header_from_packet() {
        let packet = Packet::new(Flag::END_ERR | Flag::JSON, 9, "true");
        let header = packet.header().unwrap();

        assert_eq!(header.flag, Flag::END_ERR | Flag::JSON);
        assert_eq!(header.body_length, 4);
        assert_eq!(header.request_id, 9);
    }

    #[test]
    fn test_build_packet_roundtrip() {
        let packet = Packet::new(Flag::STRING, 12, "hello");
        let bytes = build_packet(&packet).unwrap();

        let header = Header::decode(&bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(header.flag, Flag::STRING);
        assert_eq!(header.body_length, 5);
        assert_eq!(header.request_id, 12);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_build_packet_empty_body() {
        let bytes = build_packet(&Packet::new(Flag::empty(), 1, Bytes::new())).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
    }
}
