//! Integration tests for muxwire.
//!
//! Each test runs a full connection over an in-memory duplex pipe. The far
//! end is a scripted peer that speaks the packet protocol directly.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use muxwire::codec::{JsonCodec, END_BODY};
use muxwire::protocol::{Flag, Packet, PacketDecoder};
use muxwire::{
    CallContext, CallEnvelope, CallType, Encoding, InboundCall, Json, MuxError, PacketWriter,
    Rpc, RpcBuilder,
};
use tokio::io::{duplex, split, AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

const TIMEOUT: Duration = Duration::from_secs(2);

struct Peer {
    reader: ReadHalf<DuplexStream>,
    writer: PacketWriter,
    decoder: PacketDecoder,
    pending: VecDeque<Packet>,
}

impl Peer {
    fn new(reader: ReadHalf<DuplexStream>, writer: WriteHalf<DuplexStream>) -> Self {
        Self {
            reader,
            writer: PacketWriter::new(writer),
            decoder: PacketDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    async fn recv(&mut self) -> Packet {
        tokio::time::timeout(TIMEOUT, async {
            let mut buf = [0u8; 4096];
            loop {
                if let Some(packet) = self.pending.pop_front() {
                    return packet;
                }
                let n = self.reader.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed while waiting for a packet");
                self.pending.extend(self.decoder.push(&buf[..n]).unwrap());
            }
        })
        .await
        .expect("timed out waiting for a packet")
    }

    async fn recv_call(&mut self) -> (Packet, CallEnvelope) {
        let packet = self.recv().await;
        let envelope = JsonCodec::decode(packet.body()).unwrap();
        (packet, envelope)
    }

    async fn send(&self, flag: Flag, req: i32, body: impl Into<Bytes>) {
        self.writer
            .write_packet(&Packet::new(flag, req, body))
            .await
            .unwrap();
    }

    async fn end(&self, req: i32) {
        self.send(
            Flag::JSON | Flag::STREAM | Flag::END_ERR,
            req,
            Bytes::from_static(END_BODY),
        )
        .await;
    }
}

fn connect(builder: RpcBuilder) -> (Rpc, Peer) {
    let (local, remote) = duplex(64 * 1024);
    let (read_half, write_half) = split(local);
    let rpc = builder.start(read_half, write_half);
    let (peer_read, peer_write) = split(remote);
    (rpc, Peer::new(peer_read, peer_write))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_async_whoami_json_reply() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let peer_side = async {
        let (packet, envelope) = peer.recv_call().await;
        assert_eq!(packet.flag, Flag::JSON);
        assert!(packet.req > 0);
        assert_eq!(envelope.name.to_string(), "whoami");
        assert_eq!(envelope.kind, CallType::Async);
        assert_eq!(envelope.args, serde_json::json!([]));

        peer.send(Flag::JSON, -packet.req, Bytes::from_static(br#"{"id":"@abc"}"#))
            .await;
    };

    let (reply, ()) = tokio::join!(
        rpc.async_call::<Json<serde_json::Value>, _>(&ctx, Encoding::Json, "whoami", &()),
        peer_side
    );
    let Json(who) = reply.unwrap();
    assert_eq!(who, serde_json::json!({"id": "@abc"}));

    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_async_reply_with_stream_bit_is_deregistered() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let peer_side = async {
        let (packet, _) = peer.recv_call().await;
        peer.send(Flag::JSON | Flag::STREAM, -packet.req, "1").await;
    };

    let (reply, ()) = tokio::join!(
        rpc.async_call::<Json<u32>, _>(&ctx, Encoding::Json, "count", &()),
        peer_side
    );
    let Json(count) = reply.unwrap();
    assert_eq!(count, 1);
    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_async_string_reply() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let peer_side = async {
        let (packet, envelope) = peer.recv_call().await;
        assert_eq!(envelope.args, serde_json::json!(["hello"]));
        peer.send(Flag::STRING, -packet.req, "HELLO").await;
    };

    let (reply, ()) = tokio::join!(
        rpc.async_call::<String, _>(&ctx, Encoding::String, "upper", &"hello"),
        peer_side
    );
    assert_eq!(reply.unwrap(), "HELLO");
}

#[tokio::test]
async fn test_source_three_frames_then_end() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let src = rpc
        .source(&ctx, Encoding::Json, "createHistoryStream", &serde_json::json!({"live": false}))
        .await
        .unwrap();

    let (packet, envelope) = peer.recv_call().await;
    assert_eq!(packet.flag, Flag::JSON | Flag::STREAM);
    assert_eq!(envelope.kind, CallType::Source);
    assert_eq!(envelope.args, serde_json::json!([{"live": false}]));
    assert_eq!(src.request_id(), packet.req);

    for seq in 1..=3 {
        let body = format!(r#"{{"seq":{}}}"#, seq);
        peer.send(Flag::JSON | Flag::STREAM, -packet.req, body).await;
    }
    peer.end(-packet.req).await;

    let mut seen = Vec::new();
    while src.next(&ctx).await {
        let frame = src.read_bytes().unwrap();
        let value: serde_json::Value = JsonCodec::decode(&frame).unwrap();
        seen.push(value["seq"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);
    assert!(src.err().is_none());
}

#[tokio::test]
async fn test_unknown_reply_id_is_dropped() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let src = rpc
        .source(&ctx, Encoding::String, "feed", &())
        .await
        .unwrap();
    let (call, _) = peer.recv_call().await;

    peer.send(Flag::STRING | Flag::STREAM, -999, "stray").await;
    peer.send(Flag::STRING | Flag::STREAM, -call.req, "real").await;
    peer.end(-call.req).await;

    assert!(src.next(&ctx).await);
    assert_eq!(&src.read_bytes().unwrap()[..], b"real");
    assert!(!src.next(&ctx).await);
    assert!(src.err().is_none());

    assert!(!rpc.is_closed());
    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_back_to_back_calls_get_increasing_ids() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let peer_side = async {
        let (first, a) = peer.recv_call().await;
        let (second, b) = peer.recv_call().await;
        assert!(second.req > first.req);
        assert_eq!(a.name.to_string(), "first");
        assert_eq!(b.name.to_string(), "second");

        peer.send(Flag::STRING, -second.req, "two").await;
        peer.send(Flag::STRING, -first.req, "one").await;
    };

    let (one, two, ()) = tokio::join!(
        rpc.async_call::<String, _>(&ctx, Encoding::String, "first", &()),
        rpc.async_call::<String, _>(&ctx, Encoding::String, "second", &()),
        peer_side
    );
    assert_eq!(one.unwrap(), "one");
    assert_eq!(two.unwrap(), "two");
}

#[tokio::test]
async fn test_sink_upload() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let sink = rpc
        .sink(&ctx, Encoding::String, "blobs.add", &("file",))
        .await
        .unwrap();
    sink.write("chunk-1").await.unwrap();
    sink.write("chunk-2").await.unwrap();
    sink.close().await.unwrap();

    let (call, envelope) = peer.recv_call().await;
    assert_eq!(envelope.name.segments(), ["blobs", "add"]);
    assert_eq!(envelope.kind, CallType::Sink);
    assert_eq!(envelope.args, serde_json::json!(["file"]));

    for expected in ["chunk-1", "chunk-2"] {
        let packet = peer.recv().await;
        assert_eq!(packet.flag, Flag::STRING | Flag::STREAM);
        assert_eq!(packet.req, call.req);
        assert_eq!(packet.body(), expected.as_bytes());
    }

    let end = peer.recv().await;
    assert_eq!(end.flag, Flag::JSON | Flag::STREAM | Flag::END_ERR);
    assert_eq!(end.body(), END_BODY);

    peer.end(-call.req).await;
    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_sink_keeps_remote_error() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let sink = rpc
        .sink(&ctx, Encoding::String, "blobs.add", &())
        .await
        .unwrap();
    let (call, _) = peer.recv_call().await;

    let body = JsonCodec::encode_error("disk full").unwrap();
    peer.send(Flag::JSON | Flag::STREAM | Flag::END_ERR, -call.req, body)
        .await;
    eventually(|| sink.is_closed()).await;

    let err = sink.write("x").await.unwrap_err();
    assert!(matches!(err.root(), MuxError::Remote { message, .. } if message == "disk full"));
    assert!(matches!(
        sink.err().as_deref(),
        Some(MuxError::Remote { message, .. }) if message == "disk full"
    ));
    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_duplex_both_directions() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let (src, sink) = rpc
        .duplex(&ctx, Encoding::String, "echo", &())
        .await
        .unwrap();
    let (call, envelope) = peer.recv_call().await;
    assert_eq!(envelope.kind, CallType::Duplex);

    sink.write("ping").await.unwrap();
    let ping = peer.recv().await;
    assert_eq!(ping.body(), b"ping");

    peer.send(Flag::STRING | Flag::STREAM, -call.req, "pong").await;
    assert!(src.next(&ctx).await);
    let mut buf = [0u8; 16];
    let n = src.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"pong");

    peer.end(-call.req).await;
    assert!(!src.next(&ctx).await);
    assert!(src.err().is_none());

    let answer = peer.recv().await;
    assert!(answer.is_end_err());
    assert_eq!(answer.req, call.req);
    assert!(sink.is_closed());
}

#[tokio::test]
async fn test_remote_error_is_surfaced() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let peer_side = async {
        let (packet, _) = peer.recv_call().await;
        let body = JsonCodec::encode_error("no such method: nope").unwrap();
        peer.send(Flag::JSON | Flag::END_ERR, -packet.req, body).await;
    };

    let (result, ()) = tokio::join!(
        rpc.async_call::<Json<serde_json::Value>, _>(&ctx, Encoding::Json, "nope", &()),
        peer_side
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("nope"));
    match err.root() {
        MuxError::Remote { name, message } => {
            assert_eq!(name, "Error");
            assert_eq!(message, "no such method: nope");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_async_call_deadline() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background().with_timeout(Duration::from_millis(20));

    let (result, _) = tokio::join!(
        rpc.async_call::<Bytes, _>(&ctx, Encoding::Binary, "slow", &()),
        peer.recv_call()
    );
    assert!(matches!(result.unwrap_err().root(), MuxError::DeadlineExceeded));
    assert_eq!(rpc.outstanding(), 0);
}

#[tokio::test]
async fn test_connection_loss_fails_outstanding_calls() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let src = rpc.source(&ctx, Encoding::Binary, "feed", &()).await.unwrap();
    peer.recv_call().await;
    drop(peer);

    assert!(!src.next(&ctx).await);
    let err = src.err().unwrap();
    assert!(matches!(&*err, MuxError::ConnectionClosed));

    tokio::time::timeout(TIMEOUT, rpc.closed()).await.unwrap();
    assert_eq!(rpc.outstanding(), 0);
}

#[tokio::test]
async fn test_close_sentinel_ends_connection() {
    let (rpc, peer) = connect(Rpc::builder());
    peer.writer.close().await.unwrap();

    tokio::time::timeout(TIMEOUT, rpc.closed()).await.unwrap();
    assert!(rpc.is_closed());
}

#[tokio::test]
async fn test_terminate_sends_sentinel() {
    let (rpc, mut peer) = connect(Rpc::builder());
    rpc.terminate().await.unwrap();

    let mut raw = Vec::new();
    peer.reader.read_to_end(&mut raw).await.unwrap();
    assert_eq!(raw, vec![0u8; 9]);
    assert!(peer.decoder.push(&raw).unwrap().is_empty());
    assert!(peer.decoder.is_closed());
}

#[tokio::test]
async fn test_inbound_async_call_handled() {
    let builder = Rpc::builder().handler(|call: InboundCall| async move {
        assert_eq!(call.method.to_string(), "whoami");
        call.reply(&serde_json::json!({"id": "@peer"})).await.unwrap();
    });
    let (_rpc, mut peer) = connect(builder);

    let envelope = br#"{"name":["whoami"],"type":"async","args":[]}"#;
    peer.send(Flag::JSON, 1, Bytes::from_static(envelope)).await;

    let reply = peer.recv().await;
    assert_eq!(reply.req, -1);
    assert_eq!(reply.flag, Flag::JSON);
    let value: serde_json::Value = JsonCodec::decode(reply.body()).unwrap();
    assert_eq!(value, serde_json::json!({"id": "@peer"}));
}

#[tokio::test]
async fn test_inbound_source_streams_back() {
    let builder = Rpc::builder().handler(|call: InboundCall| async move {
        let (count,): (u32,) = call.args().unwrap();
        for i in 0..count {
            call.sink.write_json(&i).await.unwrap();
        }
        call.sink.close().await.unwrap();
    });
    let (rpc, mut peer) = connect(builder);

    let envelope = br#"{"name":["count"],"type":"source","args":[2]}"#;
    peer.send(Flag::JSON | Flag::STREAM, 7, Bytes::from_static(envelope)).await;

    for i in 0..2u32 {
        let frame = peer.recv().await;
        assert_eq!(frame.req, -7);
        assert_eq!(frame.flag, Flag::JSON | Flag::STREAM);
        assert_eq!(frame.body(), i.to_string().as_bytes());
    }
    let end = peer.recv().await;
    assert!(end.is_end_err());
    assert_eq!(end.req, -7);

    peer.end(7).await;
    eventually(|| rpc.outstanding() == 0).await;
}

#[tokio::test]
async fn test_inbound_call_without_handler_is_rejected() {
    let (_rpc, mut peer) = connect(Rpc::builder());

    let envelope = br#"{"name":["blobs","get"],"type":"source","args":[]}"#;
    peer.send(Flag::JSON | Flag::STREAM, 3, Bytes::from_static(envelope)).await;

    let reply = peer.recv().await;
    assert_eq!(reply.req, -3);
    assert!(reply.is_end_err());
    match JsonCodec::decode_end(reply.body()) {
        Some(MuxError::Remote { message, .. }) => assert!(message.contains("blobs.get")),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_per_call_buffer_limit() {
    let (rpc, mut peer) = connect(Rpc::builder().max_buffered_bytes(16));
    let ctx = CallContext::background();

    let src = rpc.source(&ctx, Encoding::Binary, "big", &()).await.unwrap();
    let (call, _) = peer.recv_call().await;

    peer.send(Flag::STREAM, -call.req, vec![1u8; 64]).await;

    assert!(!src.next(&ctx).await);
    let err = src.err().unwrap();
    assert!(matches!(&*err, MuxError::BufferLimit { limit: 16 }));
}

#[tokio::test]
async fn test_legacy_stream_over_live_source() {
    let (rpc, mut peer) = connect(Rpc::builder());
    let ctx = CallContext::background();

    let src = rpc.source(&ctx, Encoding::String, "log", &()).await.unwrap();
    let (call, _) = peer.recv_call().await;
    peer.send(Flag::STRING | Flag::STREAM, -call.req, "line one").await;
    peer.end(-call.req).await;

    let mut stream = src.as_stream();
    assert_eq!(
        stream.next(&ctx).await.unwrap(),
        Some(muxwire::Item::String("line one".to_string()))
    );
    assert!(stream.next(&ctx).await.unwrap().is_none());
}
