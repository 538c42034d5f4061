//! Pull-style stream adapter over a [`ByteSource`].
//!
//! Older callers consume streams one decoded item at a time. The adapter picks
//! its decoder once, from the source's encoding unless
//! [`LegacyStream::with_encoding`] overrides it:
//!
//! | Encoding | Item |
//! |---|---|
//! | JSON | one frame decoded as `T` |
//! | string | one frame, at most 1024 bytes |
//! | binary | every buffered frame, concatenated |
//!
//! The adapter is read-only: [`LegacyStream::pour`] always fails.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ByteSource;
use crate::codec::{Encoding, JsonCodec};
use crate::context::CallContext;
use crate::error::{MuxError, Result};

const STRING_BUFFER_SIZE: usize = 1024;

/// One decoded stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
    Json(T),
    String(String),
    Binary(Vec<u8>),
}

enum Decoder {
    Json,
    String(Box<[u8; STRING_BUFFER_SIZE]>),
    Binary,
}

impl Decoder {
    fn for_encoding(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => Decoder::Json,
            Encoding::String => Decoder::String(Box::new([0u8; STRING_BUFFER_SIZE])),
            Encoding::Binary => Decoder::Binary,
        }
    }
}

/// Generator-style view of a byte source.
pub struct LegacyStream<T = Value> {
    source: ByteSource,
    decoder: Decoder,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> LegacyStream<T> {
    pub(crate) fn new(source: ByteSource) -> Self {
        let decoder = Decoder::for_encoding(source.encoding());
        Self {
            source,
            decoder,
            _item: PhantomData,
        }
    }

    /// Decode JSON items as `U` instead.
    pub fn with_type<U: DeserializeOwned>(self) -> LegacyStream<U> {
        LegacyStream {
            source: self.source,
            decoder: self.decoder,
            _item: PhantomData,
        }
    }

    /// Decode frames as `encoding` instead of the source's own encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.decoder = Decoder::for_encoding(encoding);
        self
    }

    /// Rebind the request id of the underlying source.
    pub fn with_req(self, req: i32) -> Self {
        self.source.set_request_id(req);
        self
    }

    /// Get the next item, or `None` at a clean end of stream.
    pub async fn next(&mut self, ctx: &CallContext) -> Result<Option<Item<T>>> {
        if !self.source.next(ctx).await {
            return match self.source.err() {
                Some(err) => Err(MuxError::Source(err)),
                None => Ok(None),
            };
        }

        let item = match &mut self.decoder {
            Decoder::Json => {
                let frame = self.source.read_bytes()?;
                Item::Json(JsonCodec::decode(&frame)?)
            }
            Decoder::String(buf) => {
                let n = self.source.read(&mut buf[..])?;
                Item::String(String::from_utf8_lossy(&buf[..n]).into_owned())
            }
            Decoder::Binary => Item::Binary(self.source.drain_buffered().to_vec()),
        };
        Ok(Some(item))
    }

    pub fn pour(&self, _item: Value) -> Result<()> {
        Err(MuxError::ReadOnlyStream)
    }

    pub fn close(&self) -> Result<()> {
        Err(MuxError::Protocol("can't close byte source".to_string()))
    }

    /// End the underlying source with `err`.
    pub fn close_with_error(&self, err: MuxError) {
        self.source.cancel(Some(err));
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }
}
