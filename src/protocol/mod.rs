//! Protocol module - wire format, packets and the connection decoder.
//!
//! This module implements the packet codec of the shared connection:
//! - 9-byte header encoding/decoding and the close sentinel
//! - Packet struct with typed accessors
//! - Incremental decoder for accumulating partial reads
//! - Buffer pool backing per-call frame buffers

mod buffer_pool;
mod decoder;
mod packet;
mod wire_format;

pub use buffer_pool::{BufferPool, DEFAULT_BUFFER_CAPACITY, DEFAULT_POOL_SIZE};
pub use decoder::PacketDecoder;
pub use packet::{build_packet, Packet};
pub use wire_format::{Flag, Header, CLOSE_SENTINEL, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
