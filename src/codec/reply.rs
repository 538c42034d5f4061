//! Reply types for async calls.
//!
//! Each reply type declares the encoding it can be decoded from, so the
//! dispatcher can reject a mismatched request before anything is sent.
//!
//! # Example
//!
//! ```
//! use muxwire::codec::{Encoding, Json, Reply};
//! use bytes::Bytes;
//!
//! assert_eq!(<String as Reply>::ENCODING, Encoding::String);
//!
//! let Json(value): Json<serde_json::Value> =
//!     Reply::decode(Bytes::from_static(b"{\"id\":\"@abc\"}")).unwrap();
//! assert_eq!(value["id"], "@abc");
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{Encoding, JsonCodec};
use crate::error::Result;

/// A value decodable from a single reply frame.
pub trait Reply: Sized {
    /// The only encoding this type accepts.
    const ENCODING: Encoding;

    /// Decode one frame.
    fn decode(frame: Bytes) -> Result<Self>;
}

impl Reply for Bytes {
    const ENCODING: Encoding = Encoding::Binary;

    #[inline]
    fn decode(frame: Bytes) -> Result<Self> {
        Ok(frame)
    }
}

impl Reply for Vec<u8> {
    const ENCODING: Encoding = Encoding::Binary;

    #[inline]
    fn decode(frame: Bytes) -> Result<Self> {
        Ok(frame.to_vec())
    }
}

impl Reply for String {
    const ENCODING: Encoding = Encoding::String;

    fn decode(frame: Bytes) -> Result<Self> {
        Ok(String::from_utf8_lossy(&frame).into_owned())
    }
}

/// Marker wrapper for JSON-decoded replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> Reply for Json<T> {
    const ENCODING: Encoding = Encoding::Json;

    fn decode(frame: Bytes) -> Result<Self> {
        JsonCodec::decode(&frame).map(Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_zero_copy() {
        let original = Bytes::from_static(b"static data");
        let decoded = <Bytes as Reply>::decode(original.clone()).unwrap();
        assert_eq!(decoded.as_ptr(), original.as_ptr());
    }

    #[test]
    fn test_binary_data_preserved() {
        let all_bytes: Vec<u8> = (0..=255).collect();
        let decoded = <Vec<u8> as Reply>::decode(Bytes::from(all_bytes.clone())).unwrap();
        assert_eq!(decoded, all_bytes);
    }

    #[test]
    fn test_string_reply() {
        let decoded = <String as Reply>::decode(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn test_json_reply_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Whoami {
            id: String,
        }

        let Json(who): Json<Whoami> =
            Reply::decode(Bytes::from_static(b"{\"id\":\"@abc\"}")).unwrap();
        assert_eq!(who.id, "@abc");
    }

    #[test]
    fn test_declared_encodings() {
        assert_eq!(<Bytes as Reply>::ENCODING, Encoding::Binary);
        assert_eq!(<Vec<u8> as Reply>::ENCODING, Encoding::Binary);
        assert_eq!(<String as Reply>::ENCODING, Encoding::String);
        assert_eq!(<Json<u32> as Reply>::ENCODING, Encoding::Json);
    }
}
