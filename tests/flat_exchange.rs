//! End-to-end flat-text sessions over TCP loopback.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tracelink::client;
use tracelink::protocol::{ErrorCode, Kind, MessageId, Operation, Payload};
use tracelink::{Envelope, TransportKind};

mod common;
use common::{ctx, RawPeer, SPAN, TRACE};

#[tokio::test]
async fn server_echoes_ids_sent_in_peer_format() {
    let server = common::start_server(TransportKind::FlatText).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let message = format!(
        "{{\n  \"type\": \"tracing_data\",\n  \"traceid\": \"{TRACE}\",\n  \"spanid\": \"{SPAN}\",\n  \"timestamp\": 1700000000\n}}\n"
    );
    stream.write_all(message.as_bytes()).await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();

    let reply: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["message"], "Tracing data received and processed");
    assert_eq!(reply["received_traceid"], TRACE);
    assert_eq!(reply["received_spanid"], SPAN);
    assert_eq!(reply["message_id"], 0);
    assert!(reply["timestamp"].is_u64());

    drop(reader);
    server.stop().await;
}

#[tokio::test]
async fn client_flow_round_trips_generated_context() {
    let server = common::start_server(TransportKind::FlatText).await;

    let exchange = client::run_flat_exchange(&server.client_config()).await.unwrap();

    assert_eq!(exchange.reply.kind, Kind::Reply);
    assert_eq!(exchange.reply.message_id, MessageId(1));
    assert_eq!(exchange.reply.payload, Payload::Trace(exchange.sent));

    server.stop().await;
}

#[tokio::test]
async fn malformed_request_gets_error_reply_and_session_continues() {
    let server = common::start_server(TransportKind::FlatText).await;
    let mut peer = RawPeer::connect(server.addr, TransportKind::FlatText).await;

    peer.send_raw(br#"{"type":"tracing_data","message_id":7,"traceid":"xyz","spanid":"00"}"#)
        .await;
    let error = peer.recv().await;
    assert_eq!(error.kind, Kind::ErrorReply(ErrorCode::MalformedMessage));
    assert_eq!(error.message_id, MessageId(7));

    peer.send_raw(b"not even an object").await;
    let error = peer.recv().await;
    assert_eq!(error.kind, Kind::ErrorReply(ErrorCode::MalformedMessage));
    assert_eq!(error.message_id, MessageId(0));

    peer.send(&Envelope::request(MessageId(8), Operation::Get, Payload::Trace(ctx())))
        .await;
    let reply = peer.recv().await;
    assert_eq!(reply.message_id, MessageId(8));
    assert_eq!(reply.payload, Payload::Trace(ctx()));

    peer.send(&Envelope::close(MessageId(9))).await;
    let ok = peer.recv().await;
    assert_eq!((ok.kind, ok.message_id), (Kind::Reply, MessageId(9)));
    assert!(peer.recv_raw().await.is_none());

    server.stop().await;
}

#[tokio::test]
async fn cut_off_object_is_answered_and_session_continues() {
    let server = common::start_server(TransportKind::FlatText).await;
    let mut peer = RawPeer::connect(server.addr, TransportKind::FlatText).await;

    // The peer stays connected after the broken line.
    peer.send_raw(format!(r#"{{"type":"tracing_data","message_id":3,"traceid":"{TRACE}""#).as_bytes())
        .await;
    let error = peer.recv().await;
    assert_eq!(error.kind, Kind::ErrorReply(ErrorCode::MalformedMessage));
    assert_eq!(error.message_id, MessageId(3));

    peer.send(&Envelope::request(MessageId(4), Operation::Get, Payload::Trace(ctx())))
        .await;
    let reply = peer.recv().await;
    assert_eq!((reply.kind, reply.message_id), (Kind::Reply, MessageId(4)));
    assert_eq!(reply.payload, Payload::Trace(ctx()));

    server.stop().await;
}

#[tokio::test]
async fn unknown_type_is_answered_as_unsupported() {
    let server = common::start_server(TransportKind::FlatText).await;
    let mut peer = RawPeer::connect(server.addr, TransportKind::FlatText).await;

    peer.send_raw(format!(r#"{{"type":"delete_trace","message_id":3,"traceid":"{TRACE}","spanid":"{SPAN}"}}"#).as_bytes())
        .await;
    let reply = peer.recv().await;

    assert_eq!(reply.kind, Kind::ErrorReply(ErrorCode::UnsupportedOperation));
    assert_eq!(reply.message_id, MessageId(3));

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_idle_sessions() {
    let server = common::start_server(TransportKind::FlatText).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // Let the session task start before shutting down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.dispatcher.store().len(), 0);
    server.stop().await;

    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
}
