//! Concurrent access to the session registry and outbound pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use auth_gateway::core::codec::FrameCodec;
use auth_gateway::error::Result;
use auth_gateway::protocol::handshake::{FixedKeyFactory, KeyFactory, KeyMaterial};
use auth_gateway::protocol::message::{ConnectionId, OutgoingMessage};
use auth_gateway::protocol::pipeline::{FrameSink, OutboundPipeline};
use auth_gateway::transport::session_registry::SessionRegistry;
use auth_gateway::utils::metrics::Metrics;
use bytes::Bytes;
use tokio::task::JoinSet;

const TEST_KEY_PEM: &str = include_str!("fixtures/test_rsa_1024.pem");

fn material(factory: &FixedKeyFactory) -> KeyMaterial {
    factory.generate().unwrap()
}

#[derive(Default)]
struct CountingSink {
    frames: Mutex<Vec<ConnectionId>>,
}

impl FrameSink for CountingSink {
    fn deliver(&self, connection: ConnectionId, _frame: Bytes) -> Result<()> {
        self.frames.lock().unwrap().push(connection);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_create_lookup_remove() {
    let registry = SessionRegistry::new();
    let factory = Arc::new(FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, vec![5; 16]).unwrap());

    let mut tasks = JoinSet::new();
    for task in 0..16u64 {
        let registry = registry.clone();
        let factory = factory.clone();
        tasks.spawn(async move {
            let mut ids = Vec::new();
            for i in 0..25u64 {
                let connection = ConnectionId::new(task * 1000 + i);
                let session = registry.create(connection, material(&factory)).unwrap();
                assert_eq!(registry.get(connection).unwrap().session_id(), session.session_id());
                ids.push(session.session_id());
                if i % 2 == 0 {
                    assert!(registry.remove(connection).is_some());
                }
            }
            ids
        });
    }

    let mut all = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        for id in res.unwrap() {
            assert!(all.insert(id), "session id {id} handed out twice");
        }
    }
    assert_eq!(all.len(), 16 * 25);
    assert_eq!(registry.len(), 16 * 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_create_has_one_winner() {
    let registry = SessionRegistry::new();
    let factory = Arc::new(FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, vec![6; 16]).unwrap());
    let connection = ConnectionId::new(1);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let factory = factory.clone();
        tasks.spawn(async move { registry.create(connection, material(&factory)).is_ok() });
    }

    let mut winners = 0;
    while let Some(res) = tasks.join_next().await {
        if res.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_while_disconnecting() {
    let registry = SessionRegistry::new();
    let factory = FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, vec![7; 16]).unwrap();
    let metrics = Arc::new(Metrics::new());
    let outbound = Arc::new(OutboundPipeline::new(
        registry.clone(),
        FrameCodec::default(),
        vec![1, 2, 3],
        metrics.clone(),
    ));
    let sink = Arc::new(CountingSink::default());

    let staying = ConnectionId::new(1);
    let leaving = ConnectionId::new(2);
    registry.create(staying, material(&factory)).unwrap();
    registry.create(leaving, material(&factory)).unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..200u32 {
        let outbound = outbound.clone();
        let sink = sink.clone();
        tasks.spawn(async move {
            let target = if i % 2 == 0 { staying } else { leaving };
            let msg = OutgoingMessage::generic(0x01, i.to_le_bytes().to_vec()).to(target);
            let _ = outbound.send(msg, sink.as_ref());
        });
    }
    registry.remove(leaving);

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let frames = sink.frames.lock().unwrap();
    assert_eq!(frames.iter().filter(|&&c| c == staying).count(), 100);
    let lost = frames.iter().filter(|&&c| c == leaving).count() as u64;
    assert_eq!(metrics.snapshot().outbound_failures, 100 - lost);
}
