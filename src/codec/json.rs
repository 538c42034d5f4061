//! JSON codec using `serde_json`.
//!
//! Used for call envelopes, end/error packets, call arguments and every body
//! flagged [`Flag::JSON`](crate::protocol::Flag::JSON).
//!
//! # Example
//!
//! ```
//! use muxwire::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Whoami {
//!     id: String,
//! }
//!
//! let msg = Whoami { id: "@abc".to_string() };
//! let encoded = JsonCodec::encode(&msg).unwrap();
//! let decoded: Whoami = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MuxError, Result};

/// Body of an end-of-stream packet.
pub const END_BODY: &[u8] = b"true";

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode call arguments as a JSON array.
    ///
    /// Tuples, slices and vectors already serialize to arrays. `()` becomes
    /// `[]` and any other single value is wrapped as a one-element array.
    pub fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<Value> {
        Ok(match serde_json::to_value(args)? {
            Value::Null => Value::Array(Vec::new()),
            arr @ Value::Array(_) => arr,
            other => Value::Array(vec![other]),
        })
    }

    /// Encode the body of an error packet.
    pub fn encode_error(message: &str) -> Result<Vec<u8>> {
        Self::encode(&ErrorBody {
            name: "Error".to_string(),
            message: message.to_string(),
        })
    }

    /// Interpret the body of an end/error packet.
    ///
    /// Returns `None` for a clean end (`true`), the remote error otherwise.
    pub fn decode_end(body: &[u8]) -> Option<MuxError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Bool(true)) => None,
            Ok(value) => match serde_json::from_value::<ErrorBody>(value) {
                Ok(err) => Some(MuxError::Remote {
                    name: err.name,
                    message: err.message,
                }),
                Err(_) => Some(MuxError::Remote {
                    name: "Error".to_string(),
                    message: String::from_utf8_lossy(body).into_owned(),
                }),
            },
            Err(_) if body.is_empty() => None,
            Err(_) => Some(MuxError::Remote {
                name: "Error".to_string(),
                message: String::from_utf8_lossy(body).into_owned(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    #[serde(default = "default_error_name")]
    name: String,
    #[serde(default)]
    message: String,
}

fn default_error_name() -> String {
    "Error".to_string()
}
