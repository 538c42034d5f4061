//! Connection builder, call dispatcher and read loop.
//!
//! The [`RpcBuilder`] configures limits and the inbound handler. The [`Rpc`]
//! manages the lifecycle of one connection:
//! 1. Split into a read half (owned by the read loop) and a write half
//!    (shared by every call through one [`PacketWriter`])
//! 2. Issue calls: allocate an id, register the request, send the
//!    initiating packet
//! 3. Route inbound packets to the matching call by request id
//! 4. On EOF, close sentinel or read error, fail every outstanding call
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{CallContext, Encoding, Json, Rpc};
//!
//! let (read_half, write_half) = tokio::io::split(stream);
//! let rpc = Rpc::builder().start(read_half, write_half);
//!
//! let ctx = CallContext::background();
//! let Json(who): Json<serde_json::Value> = rpc
//!     .async_call(&ctx, Encoding::Json, "whoami", &())
//!     .await?;
//!
//! let src = rpc.source(&ctx, Encoding::Json, "createHistoryStream", &()).await?;
//! while src.next(&ctx).await {
//!     let frame = src.read_bytes()?;
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::watch;

use crate::codec::{Encoding, JsonCodec, Reply};
use crate::context::CallContext;
use crate::error::{MuxError, Result};
use crate::handler::{Handler, InboundCall};
use crate::protocol::{
    BufferPool, Packet, PacketDecoder, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_POOL_SIZE,
};
use crate::request::{CallEnvelope, CallType, Method, Request, RequestTable};
use crate::stream::{ByteSink, ByteSource};
use crate::writer::PacketWriter;

/// Size of each read from the connection.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Connection limits.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Largest accepted packet body.
    /// Default: 16 MiB
    pub max_body_size: u32,
    /// Largest amount of unread data buffered per call.
    /// Default: unbounded
    pub max_buffered_bytes: Option<usize>,
    /// Idle frame-buffer allocations kept for reuse.
    /// Default: 64
    pub pool_size: usize,
    /// Initial capacity of a frame buffer.
    /// Default: 4 KiB
    pub buffer_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_buffered_bytes: None,
            pool_size: DEFAULT_POOL_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Builder for configuring and starting an [`Rpc`] connection.
pub struct RpcBuilder {
    handler: Option<Arc<dyn Handler>>,
    config: RpcConfig,
}

impl RpcBuilder {
    pub fn new() -> Self {
        Self {
            handler: None,
            config: RpcConfig::default(),
        }
    }

    /// Set the handler for calls initiated by the peer.
    ///
    /// Without one, inbound calls are answered with an error packet.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set the largest accepted packet body. Larger packets end the connection.
    pub fn max_body_size(mut self, limit: u32) -> Self {
        self.config.max_body_size = limit;
        self
    }

    /// Bound the unread data buffered per call.
    ///
    /// A call exceeding it fails with [`MuxError::BufferLimit`].
    pub fn max_buffered_bytes(mut self, limit: usize) -> Self {
        self.config.max_buffered_bytes = Some(limit);
        self
    }

    /// Set how many idle frame buffers are kept for reuse.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the initial capacity of new frame buffers.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Start serving the connection.
    ///
    /// Spawns the read loop, so this must be called inside a Tokio runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> Rpc
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Rpc::start(self.handler, self.config, reader, writer)
    }
}

impl Default for RpcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    table: RequestTable,
    writer: Arc<PacketWriter>,
    pool: BufferPool,
    config: RpcConfig,
    handler: Option<Arc<dyn Handler>>,
    /// Parent of every inbound call.
    root: CallContext,
    done: watch::Sender<bool>,
}

/// A running multiplexed connection.
///
/// Cloning shares the connection.
#[derive(Clone)]
pub struct Rpc {
    shared: Arc<Shared>,
}

impl Rpc {
    pub fn builder() -> RpcBuilder {
        RpcBuilder::new()
    }

    fn start<R, W>(
        handler: Option<Arc<dyn Handler>>,
        config: RpcConfig,
        reader: R,
        writer: W,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (done, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            table: RequestTable::new(),
            writer: Arc::new(PacketWriter::new(writer)),
            pool: BufferPool::new(config.pool_size, config.buffer_capacity),
            config,
            handler,
            root: CallContext::background(),
            done,
        });

        let loop_shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::read_loop(reader, &loop_shared).await {
                tracing::error!("Read loop error: {}", e);
            }
            Self::teardown(&loop_shared);
        });

        Rpc { shared }
    }

    /// Issue an async call and decode its single reply frame.
    ///
    /// `R` must match `encoding`: [`Bytes`](bytes::Bytes) or `Vec<u8>` for
    /// binary, `String` for string, [`Json<T>`](crate::Json) for JSON.
    /// A mismatch fails before anything is sent.
    pub async fn async_call<R, A>(
        &self,
        ctx: &CallContext,
        encoding: Encoding,
        method: impl Into<Method>,
        args: &A,
    ) -> Result<R>
    where
        R: Reply,
        A: Serialize + ?Sized,
    {
        if R::ENCODING != encoding {
            return Err(MuxError::EncodingMismatch {
                expected: R::ENCODING,
                requested: encoding,
            });
        }

        let request = self
            .begin(ctx, CallType::Async, method.into(), args, encoding)
            .await?;
        let id = request.source.request_id();
        let source = &request.source;

        if !source.next(ctx).await {
            let err = match source.err() {
                Some(err) => MuxError::Source(err),
                None => match ctx.reason() {
                    Some(reason) => reason.into(),
                    None => MuxError::Protocol("call ended without a reply".to_string()),
                },
            };
            self.shared.table.remove_outbound(id);
            return Err(err.in_call(&request.method, id));
        }

        let frame = source.read_bytes();
        source.cancel(None);
        self.shared.table.remove_outbound(id);

        let frame = frame.map_err(|e| e.in_call(&request.method, id))?;
        R::decode(frame).map_err(|e| e.in_call(&request.method, id))
    }

    /// Open a stream the peer writes into.
    pub async fn source<A: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        encoding: Encoding,
        method: impl Into<Method>,
        args: &A,
    ) -> Result<ByteSource> {
        let request = self
            .begin(ctx, CallType::Source, method.into(), args, encoding)
            .await?;
        Ok(request.source)
    }

    /// Open a stream the caller writes into.
    pub async fn sink<A: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        encoding: Encoding,
        method: impl Into<Method>,
        args: &A,
    ) -> Result<ByteSink> {
        let request = self
            .begin(ctx, CallType::Sink, method.into(), args, encoding)
            .await?;
        Ok(request.sink)
    }

    /// Open a stream in both directions.
    pub async fn duplex<A: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        encoding: Encoding,
        method: impl Into<Method>,
        args: &A,
    ) -> Result<(ByteSource, ByteSink)> {
        let request = self
            .begin(ctx, CallType::Duplex, method.into(), args, encoding)
            .await?;
        Ok((request.source, request.sink))
    }

    /// Register a call and send its initiating packet.
    async fn begin<A: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        kind: CallType,
        method: Method,
        args: &A,
        encoding: Encoding,
    ) -> Result<Request> {
        let shared = &self.shared;
        let args = JsonCodec::encode_args(args).map_err(|e| e.in_call(&method, 0))?;

        let call_ctx = ctx.child();
        let request = Request {
            source: ByteSource::new(
                &shared.pool,
                shared.config.max_buffered_bytes,
                encoding,
                call_ctx.child(),
            ),
            sink: ByteSink::new(
                shared.writer.clone(),
                call_ctx.clone(),
                encoding,
                kind.is_stream(),
            ),
            method,
            kind,
            ctx: call_ctx,
        };

        let (id, body) = shared
            .table
            .register_outbound(&request, args)
            .map_err(|e| e.in_call(&request.method, 0))?;

        let packet = Packet::new(kind.flags(), id, body);
        if let Err(e) = shared.writer.write_packet(&packet).await {
            shared.table.remove_outbound(id);
            request.ctx.cancel();
            return Err(e.in_call(&request.method, id));
        }

        tracing::debug!(req = id, method = %request.method, kind = %kind, "request sent");
        Ok(request)
    }

    /// Main read loop - reads packets and routes them to calls.
    async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: &Arc<Shared>) -> Result<()> {
        let mut decoder = PacketDecoder::with_max_body(shared.config.max_body_size);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(MuxError::Io(e)),
            };

            for packet in decoder.push(&buf[..n])? {
                Self::dispatch_packet(shared, packet).await;
            }

            if decoder.is_closed() {
                tracing::debug!("Close sentinel received");
                return Ok(());
            }
        }
    }

    /// Route one packet to its call.
    async fn dispatch_packet(shared: &Arc<Shared>, packet: Packet) {
        if packet.is_reply() {
            let Some(id) = packet.req.checked_neg() else {
                tracing::warn!("Dropping packet with invalid request id {}", packet.req);
                return;
            };
            match shared.table.outbound(id) {
                Some(request) => Self::route(shared, request, packet, false).await,
                None => tracing::warn!("Dropping packet for unknown request {}", packet.req),
            }
            return;
        }

        if packet.req == 0 {
            tracing::warn!("Dropping packet with request id 0");
            return;
        }

        match shared.table.inbound(packet.req) {
            Some(request) => Self::route(shared, request, packet, true).await,
            None => Self::accept(shared, packet).await,
        }
    }

    /// Deliver a packet of a known call.
    async fn route(shared: &Arc<Shared>, request: Request, packet: Packet, inbound: bool) {
        let key = packet.req.abs();
        let remove = || {
            if inbound {
                shared.table.remove_inbound(key);
            } else {
                shared.table.remove_outbound(key);
            }
        };

        if packet.is_end_err() {
            match JsonCodec::decode_end(packet.body()) {
                None => {
                    tracing::debug!(req = packet.req, method = %request.method, "stream ended");
                    request.source.cancel(None);
                }
                Some(err) => {
                    tracing::debug!(req = packet.req, method = %request.method, "stream failed: {}", err);
                    let err = Arc::new(err);
                    request.sink.record_error(err.clone());
                    request.source.fail(err);
                }
            }

            let answer_end = match request.kind {
                CallType::Async => false,
                CallType::Source => inbound,
                CallType::Sink | CallType::Duplex => true,
            };
            if answer_end {
                if let Err(e) = request.sink.close().await {
                    tracing::debug!(req = packet.req, "closing sink failed: {}", e);
                }
            }
            remove();
            return;
        }

        let len = packet.body_len() as u32;
        match request.source.consume(len, packet.body()) {
            Ok(()) => {
                if request.kind == CallType::Async && !packet.is_stream() {
                    request.source.cancel(None);
                    remove();
                }
            }
            Err(e) => {
                tracing::warn!(req = packet.req, method = %request.method, "dropping call: {}", e);
                request.abort(e);
                remove();
            }
        }
    }

    /// Start serving a call initiated by the peer.
    async fn accept(shared: &Arc<Shared>, packet: Packet) {
        let req = packet.req;

        if packet.is_end_err() {
            tracing::debug!("Ignoring end of unknown call {}", req);
            return;
        }

        let envelope: CallEnvelope = match JsonCodec::decode(packet.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Malformed call {}: {}", req, e);
                let reply = ByteSink::new(
                    shared.writer.clone(),
                    shared.root.clone(),
                    Encoding::Json,
                    packet.is_stream(),
                );
                reply.set_request_id(-req);
                if let Err(e) = reply.close_with_error(&e.to_string()).await {
                    tracing::warn!("Failed to reject call {}: {}", req, e);
                }
                return;
            }
        };

        let encoding = Encoding::from_flag(packet.flag);
        let ctx = shared.root.child();
        let request = Request {
            source: ByteSource::new(
                &shared.pool,
                shared.config.max_buffered_bytes,
                encoding,
                ctx.child(),
            ),
            sink: ByteSink::new(
                shared.writer.clone(),
                ctx.clone(),
                encoding,
                envelope.kind.is_stream(),
            ),
            method: envelope.name,
            kind: envelope.kind,
            ctx,
        };
        request.source.set_request_id(req);
        request.sink.set_request_id(-req);

        let Some(handler) = shared.handler.clone() else {
            tracing::warn!(req, method = %request.method, "No handler for inbound call");
            let message = format!("no such method: {}", request.method);
            if let Err(e) = request.sink.close_with_error(&message).await {
                tracing::warn!("Failed to reject call {}: {}", req, e);
            }
            return;
        };

        if request.kind.is_stream() {
            if let Err(e) = shared.table.register_inbound(req, &request) {
                tracing::warn!(req, "Rejecting inbound call: {}", e);
                return;
            }
        }

        tracing::debug!(req, method = %request.method, kind = %request.kind, "inbound call");
        let call = InboundCall {
            method: request.method,
            kind: request.kind,
            args: envelope.args,
            source: request.source,
            sink: request.sink,
            ctx: request.ctx,
        };
        tokio::spawn(handler.call(call));
    }

    /// Fail every outstanding call and reject new ones.
    fn teardown(shared: &Arc<Shared>) {
        let outstanding = shared.table.close();
        if !outstanding.is_empty() {
            tracing::debug!("Connection closed with {} outstanding calls", outstanding.len());
        }
        for request in outstanding {
            request.abort(MuxError::ConnectionClosed);
        }
        shared.root.cancel();
        shared.done.send_replace(true);
    }

    /// Send the close sentinel and shut the write half down.
    pub async fn terminate(&self) -> Result<()> {
        self.shared.writer.close().await
    }

    /// Wait until the read loop has ended.
    pub async fn closed(&self) {
        let mut done = self.shared.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Check whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.table.is_closed()
    }

    /// Number of calls still registered.
    pub fn outstanding(&self) -> usize {
        self.shared.table.len()
    }
}
