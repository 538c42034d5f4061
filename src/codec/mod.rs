//! Codec module - body encodings and reply decoding.
//!
//! - [`Encoding`] - the binary / string / JSON body contract of a call
//! - [`JsonCodec`] - envelopes, arguments and end/error bodies
//! - [`Reply`] - typed decoding of async replies, checked against the encoding
//!
//! # Example
//!
//! ```
//! use muxwire::codec::Encoding;
//! use muxwire::protocol::Flag;
//!
//! assert_eq!(Encoding::Json.flag(), Flag::JSON);
//! assert_eq!(Encoding::from_flag(Flag::STRING | Flag::STREAM), Encoding::String);
//! ```

mod json;
mod reply;

use std::fmt;

pub use json::{JsonCodec, END_BODY};
pub use reply::{Json, Reply};

use crate::protocol::Flag;

/// Declared encoding of a call's bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Binary,
    String,
    Json,
}

impl Encoding {
    /// The body-type bits for this encoding.
    pub const fn flag(self) -> Flag {
        match self {
            Encoding::Binary => Flag::empty(),
            Encoding::String => Flag::STRING,
            Encoding::Json => Flag::JSON,
        }
    }

    /// Read the body-type bits of a flag. JSON wins if both bits are set.
    pub fn from_flag(flag: Flag) -> Self {
        if flag.get(Flag::JSON) {
            Encoding::Json
        } else if flag.get(Flag::STRING) {
            Encoding::String
        } else {
            Encoding::Binary
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Binary => f.write_str("TypeBinary"),
            Encoding::String => f.write_str("TypeString"),
            Encoding::Json => f.write_str("TypeJSON"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_roundtrip() {
        for enc in [Encoding::Binary, Encoding::String, Encoding::Json] {
            assert_eq!(Encoding::from_flag(enc.flag()), enc);
        }
    }

    #[test]
    fn test_from_flag_ignores_stream_bits() {
        let flag = Flag::JSON | Flag::STREAM | Flag::END_ERR;
        assert_eq!(Encoding::from_flag(flag), Encoding::Json);
        assert_eq!(Encoding::from_flag(Flag::STREAM), Encoding::Binary);
    }
}
