//! Connection lifecycle: session setup on accept, teardown on close.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{KeyFactory, KeyMaterial};
use crate::protocol::message::{ConnectionId, OutgoingMessage};
use crate::protocol::pipeline::{FrameSink, OutboundPipeline};
use crate::transport::session_registry::{Session, SessionRegistry};
use crate::utils::metrics::{Metrics, Timer};

pub struct LifecycleController {
    registry: SessionRegistry,
    keys: Arc<dyn KeyFactory>,
    outbound: Arc<OutboundPipeline>,
    sink: Arc<dyn FrameSink>,
    protocol_revision: u32,
    metrics: Arc<Metrics>,
}

impl LifecycleController {
    pub fn new(
        registry: SessionRegistry,
        keys: Arc<dyn KeyFactory>,
        outbound: Arc<OutboundPipeline>,
        sink: Arc<dyn FrameSink>,
        protocol_revision: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            keys,
            outbound,
            sink,
            protocol_revision,
            metrics,
        }
    }

    /// Create the session of a freshly accepted connection and send `Init`.
    ///
    /// Key generation runs on the blocking pool. If `Init` cannot be handed
    /// to the transport the session is removed again and the error returned;
    /// the caller closes the connection.
    #[instrument(level = "debug", skip(self))]
    pub async fn on_connect(&self, connection: ConnectionId) -> Result<Arc<Session>> {
        let keys = self.keys.clone();
        let material = tokio::task::spawn_blocking(move || {
            let _timer = Timer::start("key_generation");
            keys.generate()
        })
        .await
        .map_err(|e| ProtocolError::KeyGeneration(format!("Key generation task failed: {e}")))
        .and_then(|generated| generated)
        .inspect_err(|_| self.metrics.handshake_failed())?;

        self.open(connection, material)
    }

    fn open(
        &self,
        connection: ConnectionId,
        material: KeyMaterial,
    ) -> Result<Arc<Session>> {
        let session = self
            .registry
            .create(connection, material)
            .inspect_err(|_| self.metrics.handshake_failed())?;

        let init = OutgoingMessage::init(
            session.session_id(),
            *session.keys().scrambled_modulus(),
            session.keys().blowfish_key(),
            self.protocol_revision,
        )
        .to(connection);

        if let Err(e) = self.outbound.send(init, self.sink.as_ref()) {
            warn!(%connection, error = %e, "Failed to send Init");
            self.metrics.handshake_failed();
            self.registry.remove(connection);
            return Err(e);
        }

        self.metrics.session_created();
        info!(%connection, session_id = session.session_id(), "Session opened");
        Ok(session)
    }

    /// Drop the session of a closed connection. Returns whether one existed.
    ///
    /// Replies still queued for the connection fail their session lookup and
    /// are discarded.
    pub fn on_disconnect(&self, connection: ConnectionId) -> bool {
        let removed = self.registry.remove(connection).is_some();
        if removed {
            debug!(%connection, "Session closed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::FrameCodec;
    use crate::protocol::handshake::{unscramble_modulus, FixedKeyFactory, MODULUS_LEN};
    use crate::utils::crypto::xor_static_key;
    use bytes::Bytes;
    use rsa::traits::PublicKeyParts;
    use std::sync::Mutex;

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/test_rsa_1024.pem");
    const STATIC_KEY: [u8; 4] = [0x10, 0x20, 0x30, 0x40];

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

    struct ClosedSink;

    impl FrameSink for ClosedSink {
        fn deliver(&self, _: ConnectionId, _: Bytes) -> Result<()> {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    fn controller(sink: Arc<dyn FrameSink>) -> (LifecycleController, SessionRegistry) {
        let registry = SessionRegistry::with_first_session_id(0x0A0B0C0D);
        let metrics = Arc::new(Metrics::new());
        let outbound = Arc::new(OutboundPipeline::new(
            registry.clone(),
            FrameCodec::default(),
            STATIC_KEY.to_vec(),
            metrics.clone(),
        ));
        let keys = Arc::new(
            FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, (0u8..16).collect()).unwrap(),
        );
        let controller =
            LifecycleController::new(registry.clone(), keys, outbound, sink, 0xc621, metrics);
        (controller, registry)
    }

    #[tokio::test]
    async fn test_connect_sends_init() {
        let sink = Arc::new(RecordingSink::default());
        let (lifecycle, registry) = controller(sink.clone());
        let id = ConnectionId::new(1);

        let session = lifecycle.on_connect(id).await.unwrap();
        assert!(registry.contains(id));

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let (to, frame) = &frames[0];
        assert_eq!(*to, id);

        let length = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(length, frame.len());

        let mut body = frame[2..].to_vec();
        assert_eq!(body.len() % 8, 0);
        xor_static_key(&mut body, &STATIC_KEY);
        assert_eq!(body[0], 0x00);
        assert_eq!(&body[1..5], &0x0A0B0C0Du32.to_le_bytes());

        let mut scrambled = [0u8; MODULUS_LEN];
        scrambled.copy_from_slice(&body[5..5 + MODULUS_LEN]);
        assert_eq!(
            &unscramble_modulus(&scrambled)[..],
            &session.keys().public_key().n().to_bytes_be()[..]
        );
        assert_eq!(
            &body[5 + MODULUS_LEN..21 + MODULUS_LEN],
            &(0u8..16).collect::<Vec<_>>()[..]
        );
        assert_eq!(&body[21 + MODULUS_LEN..25 + MODULUS_LEN], &0xc621u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_failed_init_removes_session() {
        let (lifecycle, registry) = controller(Arc::new(ClosedSink));
        let id = ConnectionId::new(2);

        assert!(matches!(
            lifecycle.on_connect(id).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let (lifecycle, registry) = controller(sink.clone());
        let id = ConnectionId::new(3);

        let first = lifecycle.on_connect(id).await.unwrap();
        assert!(matches!(
            lifecycle.on_connect(id).await,
            Err(ProtocolError::DuplicateSession(_))
        ));
        assert_eq!(registry.get(id).unwrap().session_id(), first.session_id());
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_once() {
        let sink = Arc::new(RecordingSink::default());
        let (lifecycle, registry) = controller(sink);
        let id = ConnectionId::new(4);

        lifecycle.on_connect(id).await.unwrap();
        assert!(lifecycle.on_disconnect(id));
        assert!(!lifecycle.on_disconnect(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_with_prepared_material() {
        let sink = Arc::new(RecordingSink::default());
        let (lifecycle, _) = controller(sink.clone());
        let material: KeyMaterial = FixedKeyFactory::from_pkcs8_pem(TEST_KEY_PEM, vec![1; 8])
            .unwrap()
            .generate()
            .unwrap();

        let session = lifecycle.open(ConnectionId::new(5), material).unwrap();
        assert_eq!(session.keys().blowfish_key(), &[1u8; 8]);
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }
}
