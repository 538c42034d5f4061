//! Per-call streams.
//!
//! - [`ByteSource`] - frames received for a call, pulled with `next`
//! - [`ByteSink`] - frames sent for a call
//! - [`LegacyStream`] - decoded item-at-a-time view of a source

mod frame_buffer;
mod legacy;
mod sink;
mod source;

pub use legacy::{Item, LegacyStream};
pub use sink::ByteSink;
pub use source::ByteSource;
