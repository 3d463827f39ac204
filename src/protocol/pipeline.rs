//! Outbound and inbound packet pipelines.
//!
//! ```text
//! outbound: Built -> Padded -> StaticKeyEncoded  -> CipherApplied -> Framed -> Sent
//!                           \-> ChecksumAppended -/
//! inbound:  frame -> Blowfish decrypt -> checksum -> opcode -> handler lookup -> worker pool
//! ```
//!
//! Only the `Init` handshake takes the static-key branch; it is neither
//! checksummed nor Blowfish-encrypted because the client has no session key
//! yet. Every transform step runs synchronously on the caller's task; only
//! handler execution is moved to the [`WorkerPool`].

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{Handler, HandlerContext, HandlerResolver};
use crate::protocol::message::{ConnectionId, IncomingMessage, OutgoingMessage};
use crate::transport::session_registry::SessionRegistry;
use crate::utils::crypto::{
    append_checksum, append_padding, validate_checksum, xor_static_key, CHECKSUM_SIZE,
};
use crate::utils::metrics::Metrics;
use crate::utils::worker_pool::WorkerPool;

/// Transport side of the outbound pipeline: accepts finished frames for a
/// connection.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, connection: ConnectionId, frame: Bytes) -> Result<()>;
}

/// Stages of one outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundStage {
    Built,
    Padded,
    StaticKeyEncoded,
    ChecksumAppended,
    CipherApplied,
    Framed,
    Sent,
}

pub struct OutboundPipeline {
    registry: SessionRegistry,
    codec: FrameCodec,
    static_key: Arc<[u8]>,
    metrics: Arc<Metrics>,
}

impl OutboundPipeline {
    pub fn new(
        registry: SessionRegistry,
        codec: FrameCodec,
        static_key: impl Into<Arc<[u8]>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            codec,
            static_key: static_key.into(),
            metrics,
        }
    }

    /// Run `msg` up to [`OutboundStage::Framed`] and return the wire bytes.
    pub fn process(&self, msg: &OutgoingMessage) -> Result<Bytes> {
        self.run(msg, None)
    }

    /// Run `msg` through every stage and hand the frame to `sink`.
    ///
    /// A failure aborts this message only; the caller decides whether it
    /// matters (it does not once the target has disconnected).
    pub fn send(&self, msg: OutgoingMessage, sink: &dyn FrameSink) -> Result<()> {
        self.run(&msg, Some(sink)).map(|_| ())
    }

    fn run(&self, msg: &OutgoingMessage, sink: Option<&dyn FrameSink>) -> Result<Bytes> {
        let mut payload = msg.serialize();
        let mut frame = BytesMut::new();
        let mut stage = OutboundStage::Built;

        loop {
            stage = match self.advance(stage, msg, &mut payload, &mut frame, sink) {
                Ok(Some(next)) => next,
                Ok(None) => return Ok(frame.freeze()),
                Err(e) => {
                    self.metrics.outbound_failure();
                    debug!(
                        target_connection = ?msg.target(),
                        opcode = msg.opcode(),
                        ?stage,
                        error = %e,
                        "Outbound message aborted"
                    );
                    return Err(e);
                }
            };
            trace!(target_connection = ?msg.target(), ?stage, "Outbound stage reached");
        }
    }

    fn advance(
        &self,
        stage: OutboundStage,
        msg: &OutgoingMessage,
        payload: &mut BytesMut,
        frame: &mut BytesMut,
        sink: Option<&dyn FrameSink>,
    ) -> Result<Option<OutboundStage>> {
        let next = match stage {
            OutboundStage::Built => {
                let reserved = if msg.uses_static_key() { 0 } else { CHECKSUM_SIZE };
                append_padding(payload, reserved);
                OutboundStage::Padded
            }
            OutboundStage::Padded if msg.uses_static_key() => {
                xor_static_key(payload, &self.static_key);
                OutboundStage::StaticKeyEncoded
            }
            OutboundStage::Padded => {
                append_checksum(payload)?;
                OutboundStage::ChecksumAppended
            }
            // the static key is the handshake's only cipher
            OutboundStage::StaticKeyEncoded => OutboundStage::CipherApplied,
            OutboundStage::ChecksumAppended => {
                let target = msg.target().ok_or(ProtocolError::MissingTarget)?;
                let session = self.registry.get(target)?;
                session.keys().cipher().encrypt(payload);
                OutboundStage::CipherApplied
            }
            OutboundStage::CipherApplied => {
                self.codec.encode_frame(payload, frame)?;
                OutboundStage::Framed
            }
            OutboundStage::Framed => {
                let Some(sink) = sink else {
                    return Ok(None);
                };
                let target = msg.target().ok_or(ProtocolError::MissingTarget)?;
                let bytes = frame.split().freeze();
                let len = bytes.len() as u64;
                sink.deliver(target, bytes)?;
                self.metrics.frame_sent(len);
                OutboundStage::Sent
            }
            OutboundStage::Sent => return Ok(None),
        };
        Ok(Some(next))
    }
}

/// A decoded packet bound to its handler, ready for the worker pool.
pub struct Dispatch {
    pub context: HandlerContext,
    pub handler: Arc<dyn Handler>,
    pub message: IncomingMessage,
}

impl Dispatch {
    pub fn connection(&self) -> ConnectionId {
        self.context.connection()
    }
}

pub struct InboundPipeline {
    registry: SessionRegistry,
    resolver: Arc<dyn HandlerResolver>,
    pool: Arc<WorkerPool>,
    metrics: Arc<Metrics>,
}

impl InboundPipeline {
    pub fn new(
        registry: SessionRegistry,
        resolver: Arc<dyn HandlerResolver>,
        pool: Arc<WorkerPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            resolver,
            pool,
            metrics,
        }
    }

    /// Decrypt, verify and resolve one frame body.
    pub fn decode(&self, connection: ConnectionId, mut frame: BytesMut) -> Result<Dispatch> {
        let session = self.registry.get(connection)?;
        session.keys().cipher().decrypt(&mut frame)?;

        if let Err(e) = validate_checksum(&mut frame) {
            self.metrics.checksum_failure();
            return Err(e);
        }

        if frame.is_empty() {
            return Err(ProtocolError::EmptyPacket);
        }
        let opcode = frame.get_u8();
        let handler = self.resolver.resolve(opcode)?;

        trace!(%connection, opcode, len = frame.len(), "Frame decoded");
        Ok(Dispatch {
            context: HandlerContext::new(connection, session),
            handler,
            message: IncomingMessage::new(connection, opcode, frame.freeze()),
        })
    }

    /// Decode a frame and queue it for execution.
    ///
    /// Message-local failures are logged and swallowed; an `Err` means the
    /// connection must be closed. Waits for queue capacity, so frames of one
    /// connection are submitted in receipt order.
    pub async fn on_frame(&self, connection: ConnectionId, frame: BytesMut) -> Result<()> {
        self.metrics.frame_received(frame.len() as u64);
        match self.decode(connection, frame) {
            Ok(dispatch) => self.pool.submit(dispatch).await,
            Err(e) if !e.is_connection_fatal() => {
                self.metrics.dropped_message();
                warn!(%connection, error = %e, "Dropping packet");
                Ok(())
            }
            Err(e) => {
                self.metrics.protocol_error();
                Err(e)
            }
        }
    }
}
