//! Wire format encoding and decoding.
//!
//! Implements the 9-byte packet header:
//! ```text
//! ┌───────┬──────────┬──────────┐
//! │ Flags │ Length   │ Req ID   │
//! │ 1 byte│ 4 bytes  │ 4 bytes  │
//! │       │ uint32 BE│ int32 BE │
//! └───────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. A header of nine zero bytes is the
//! close sentinel and is followed by no body.

use std::fmt;

use crate::error::{MuxError, Result};

/// Header size in bytes (fixed, exactly 9).
pub const HEADER_SIZE: usize = 9;

/// The close sentinel: an all-zero header.
pub const CLOSE_SENTINEL: [u8; HEADER_SIZE] = [0u8; HEADER_SIZE];

/// Default maximum body size accepted from the peer (16 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Packet flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flag(u8);

impl Flag {
    /// Body is a UTF-8 string.
    pub const STRING: Flag = Flag(0b0000_0001);
    /// Body is JSON.
    pub const JSON: Flag = Flag(0b0000_0010);
    /// End of stream or error marker.
    pub const END_ERR: Flag = Flag(0b0000_0100);
    /// Packet belongs to a stream.
    pub const STREAM: Flag = Flag(0b0000_1000);

    /// No bits set (binary body, single message).
    pub const fn empty() -> Self {
        Flag(0)
    }

    /// Build a flag from its raw byte.
    pub const fn from_bits(bits: u8) -> Self {
        Flag(bits)
    }

    /// The raw byte.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Return a copy with `other` set.
    #[inline]
    pub const fn set(self, other: Flag) -> Self {
        Flag(self.0 | other.0)
    }

    /// Return a copy with `other` cleared.
    #[inline]
    pub const fn clear(self, other: Flag) -> Self {
        Flag(self.0 & !other.0)
    }

    /// Check if all bits of `other` are set.
    #[inline]
    pub const fn get(self, other: Flag) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for Flag {
    type Output = Flag;

    fn bitor(self, rhs: Flag) -> Flag {
        self.set(rhs)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::with_capacity(4);
        if self.get(Flag::STRING) {
            names.push("String");
        }
        if self.get(Flag::JSON) {
            names.push("JSON");
        }
        if self.get(Flag::END_ERR) {
            names.push("EndErr");
        }
        if self.get(Flag::STREAM) {
            names.push("Stream");
        }
        if names.is_empty() {
            return f.write_str("Binary");
        }
        f.write_str(&names.join("|"))
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte.
    pub flag: Flag,
    /// Body length in bytes.
    pub body_length: u32,
    /// Request identifier; negative ids are replies to the peer's calls.
    pub request_id: i32,
}

impl Header {
    /// Create a new header.
    pub fn new(flag: Flag, body_length: u32, request_id: i32) -> Self {
        Self {
            flag,
            body_length,
            request_id,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{Flag, Header};
    ///
    /// let header = Header::new(Flag::JSON, 100, 42);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 9);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (9 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.flag.bits();
        buf[1..5].copy_from_slice(&self.body_length.to_be_bytes());
        buf[5..9].copy_from_slice(&self.request_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// ```
    /// use muxwire::protocol::Header;
    ///
    /// let bytes = [0x0a, 0, 0, 0, 5, 0xff, 0xff, 0xff, 0xfe];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.body_length, 5);
    /// assert_eq!(header.request_id, -2);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flag: Flag::from_bits(buf[0]),
            body_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            request_id: i32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }

    /// Check the body length against the accepted maximum.
    pub fn validate(&self, max_body_size: u32) -> Result<()> {
        if self.body_length > max_body_size {
            return Err(MuxError::Protocol(format!(
                "Body size {} exceeds maximum {}",
                self.body_length, max_body_size
            )));
        }
        Ok(())
    }

    /// Check if this header is the close sentinel.
    #[inline]
    pub fn is_close_sentinel(&self) -> bool {
        self.flag.bits() == 0 && self.body_length == 0 && self.request_id == 0
    }

    /// Check if this closes a stream or carries an error.
    #[inline]
    pub fn is_end_err(&self) -> bool {
        self.flag.get(Flag::END_ERR)
    }

    /// Check if this is a stream packet.
    #[inline]
    pub fn is_stream(&self) -> bool {
        self.flag.get(Flag::STREAM)
    }
}
