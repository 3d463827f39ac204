// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::core::codec::{FrameCodec, HeaderWidth};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{handler_fn, Dispatcher};
use crate::protocol::handshake::{FixedKeyFactory, KeyFactory};
use crate::protocol::message::{ConnectionId, OutgoingMessage};
use crate::protocol::pipeline::{FrameSink, InboundPipeline, OutboundPipeline};
use crate::transport::session_registry::SessionRegistry;
use crate::utils::crypto::{append_checksum, append_padding, validate_checksum, CHECKSUM_SIZE};
use crate::utils::metrics::Metrics;
use crate::utils::worker_pool::WorkerPool;

const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/test_rsa_1024.pem");
const BLOWFISH_KEY: [u8; 16] = *b"0123456789abcdef";

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<(ConnectionId, Bytes)>>,
}

impl FrameSink for RecordingSink {
    fn deliver(&self, connection: ConnectionId, frame: Bytes) -> Result<()> {
        self.frames.lock().unwrap().push((connection, frame));
        Ok(())
    }
}

struct Harness {
    registry: SessionRegistry,
    metrics: Arc<Metrics>,
    sink: Arc<RecordingSink>,
    outbound: Arc<OutboundPipeline>,
    inbound: InboundPipeline,
    pool: Arc<WorkerPool>,
}

fn harness(dispatcher: Dispatcher) -> Harness {
    let registry = SessionRegistry::new();
    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(RecordingSink::default());
    let outbound = Arc::new(OutboundPipeline::new(
        registry.clone(),
        FrameCodec::default(),
        vec![0x5A; 16],
        metrics.clone(),
    ));
    let pool = Arc::new(
        WorkerPool::new(2, 8, outbound.clone(), sink.clone(), metrics.clone()).unwrap(),
    );
    let inbound = InboundPipeline::new(
        registry.clone(),
        Arc::new(dispatcher),
        pool.clone(),
        metrics.clone(),
    );
    Harness {
        registry,
        metrics,
        sink,
        outbound,
        inbound,
        pool,
    }
}

fn open(registry: &SessionRegistry, connection: ConnectionId) {
    let keys = FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, BLOWFISH_KEY.to_vec())
        .unwrap()
        .generate()
        .unwrap();
    registry.create(connection, keys).unwrap();
}

/// What a client sends: opcode and body, padded, checksummed, encrypted.
fn client_frame(registry: &SessionRegistry, connection: ConnectionId, packet: &[u8]) -> BytesMut {
    let mut body = BytesMut::from(packet);
    append_padding(&mut body, CHECKSUM_SIZE);
    append_checksum(&mut body).unwrap();
    registry
        .get(connection)
        .unwrap()
        .keys()
        .cipher()
        .encrypt(&mut body);
    body
}

#[test]
fn test_outbound_generic_is_checksummed_and_encrypted() {
    let h = harness(Dispatcher::new());
    let id = ConnectionId::new(1);
    open(&h.registry, id);

    let msg = OutgoingMessage::generic(0x04, vec![1, 2, 3]).to(id);
    let frame = h.outbound.process(&msg).unwrap();

    let length = u16::from_le_bytes([frame[0], frame[1]]) as usize;
    assert_eq!(length, frame.len());
    assert_eq!((length - 2) % 8, 0);

    let mut body = BytesMut::from(&frame[2..]);
    let session = h.registry.get(id).unwrap();
    session.keys().cipher().decrypt(&mut body).unwrap();
    validate_checksum(&mut body).unwrap();
    assert_eq!(&body[..4], &[0x04, 1, 2, 3]);
    assert!(body[4..].iter().all(|&b| b == 0));
}

#[test]
fn test_outbound_failures_abort_the_message() {
    let h = harness(Dispatcher::new());

    let unaddressed = OutgoingMessage::generic(0x01, vec![]);
    assert!(matches!(
        h.outbound.process(&unaddressed),
        Err(ProtocolError::MissingTarget)
    ));

    let unknown = OutgoingMessage::generic(0x01, vec![]).to(ConnectionId::new(42));
    assert!(matches!(
        h.outbound.send(unknown, h.sink.as_ref()),
        Err(ProtocolError::UnknownSession(_))
    ));

    assert!(h.sink.frames.lock().unwrap().is_empty());
    assert_eq!(h.metrics.snapshot().outbound_failures, 2);
}

#[test]
fn test_outbound_length_overflow_is_not_sent() {
    let registry = SessionRegistry::new();
    let id = ConnectionId::new(1);
    open(&registry, id);
    let outbound = OutboundPipeline::new(
        registry,
        FrameCodec::new(HeaderWidth::UnsignedByte),
        vec![1],
        Arc::new(Metrics::new()),
    );
    let sink = RecordingSink::default();

    let msg = OutgoingMessage::generic(0x02, vec![0u8; 300]).to(id);
    assert!(matches!(
        outbound.send(msg, &sink),
        Err(ProtocolError::LengthOverflow { .. })
    ));
    assert!(sink.frames.lock().unwrap().is_empty());
}

#[test]
fn test_handshake_skips_session_cipher() {
    let h = harness(Dispatcher::new());
    let id = ConnectionId::new(1);
    // no session needed: the static key is the only transform
    let msg = OutgoingMessage::init(7, [0u8; 128], &BLOWFISH_KEY, 0xc621).to(id);
    h.outbound.send(msg, h.sink.as_ref()).unwrap();

    let frames = h.sink.frames.lock().unwrap();
    let body = &frames[0].1[2..];
    assert_eq!(body.len(), 160);
    // opcode 0x00 XOR static key
    assert_eq!(body[0], 0x5A);
}

#[tokio::test]
async fn test_inbound_reply_roundtrip() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        0x07,
        handler_fn(|ctx, msg| {
            let value = msg.reader().read_u32()?;
            assert_eq!(ctx.session().session_id(), 0);
            Ok(Some(OutgoingMessage::generic(0x0B, (value + 1).to_le_bytes().to_vec())))
        }),
    );
    let h = harness(dispatcher);
    let id = ConnectionId::new(3);
    open(&h.registry, id);

    let frame = client_frame(&h.registry, id, &[0x07, 0x29, 0, 0, 0]);
    h.inbound.on_frame(id, frame).await.unwrap();
    h.pool.shutdown();

    let frames = h.sink.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, id);

    let mut body = BytesMut::from(&frames[0].1[2..]);
    h.registry
        .get(id)
        .unwrap()
        .keys()
        .cipher()
        .decrypt(&mut body)
        .unwrap();
    validate_checksum(&mut body).unwrap();
    assert_eq!(&body[..5], &[0x0B, 0x2A, 0, 0, 0]);
}

#[test]
fn test_inbound_decode_resolves_handler() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(0x02, handler_fn(|_, _| Ok(None)));
    let h = harness(dispatcher);
    let id = ConnectionId::new(9);
    open(&h.registry, id);

    let dispatch = h
        .inbound
        .decode(id, client_frame(&h.registry, id, &[0x02, 0xAB]))
        .unwrap();
    assert_eq!(dispatch.connection(), id);
    assert_eq!(dispatch.message.opcode(), 0x02);
    // cipher padding stays in the body
    assert_eq!(dispatch.message.body()[0], 0xAB);
}

#[tokio::test]
async fn test_unknown_opcode_is_dropped_not_fatal() {
    let h = harness(Dispatcher::new());
    let id = ConnectionId::new(2);
    open(&h.registry, id);

    let frame = client_frame(&h.registry, id, &[0x33, 1, 2]);
    assert!(h.inbound.on_frame(id, frame).await.is_ok());
    assert_eq!(h.metrics.snapshot().dropped_messages, 1);
}

#[tokio::test]
async fn test_tampered_frame_is_fatal() {
    let h = harness(Dispatcher::new());
    let id = ConnectionId::new(2);
    open(&h.registry, id);

    let mut frame = client_frame(&h.registry, id, &[0x01, 1, 2, 3]);
    frame[3] ^= 0x01;
    let err = h.inbound.on_frame(id, frame).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    assert!(err.is_connection_fatal());
    assert_eq!(h.metrics.snapshot().checksum_failures, 1);
}

#[test]
fn test_inbound_rejects_misaligned_and_sessionless_frames() {
    let h = harness(Dispatcher::new());
    let id = ConnectionId::new(5);

    assert!(matches!(
        h.inbound.decode(id, BytesMut::from(&[0u8; 16][..])),
        Err(ProtocolError::UnknownSession(_))
    ));

    open(&h.registry, id);
    assert!(matches!(
        h.inbound.decode(id, BytesMut::from(&[0u8; 12][..])),
        Err(ProtocolError::InvalidBlockLength(12))
    ));
}
