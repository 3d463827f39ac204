//! # Gateway
//!
//! Wires the gateway's shared state together: session registry, connection
//! table, outbound and inbound pipelines, lifecycle controller and worker
//! pool. One `Gateway` serves one listener; everything in it is
//! per-instance, so tests can run several side by side.
//!
//! ```ignore
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(0x00, handler_fn(|ctx, msg| { /* RequestAuthLogin */ Ok(None) }));
//!
//! let gateway = Arc::new(Gateway::new(GatewayConfig::default(), Arc::new(dispatcher))?);
//! Server::bind(gateway).await?.run().await?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::GatewayConfig;
use crate::core::codec::FrameCodec;
use crate::error::Result;
use crate::protocol::dispatcher::HandlerResolver;
use crate::protocol::handshake::{KeyFactory, RandomKeyFactory};
use crate::protocol::pipeline::{FrameSink, InboundPipeline, OutboundPipeline};
use crate::service::lifecycle::LifecycleController;
use crate::transport::connections::ConnectionTable;
use crate::transport::session_registry::SessionRegistry;
use crate::utils::metrics::Metrics;
use crate::utils::worker_pool::WorkerPool;

pub struct Gateway {
    config: GatewayConfig,
    codec: FrameCodec,
    registry: SessionRegistry,
    connections: ConnectionTable,
    outbound: Arc<OutboundPipeline>,
    inbound: Arc<InboundPipeline>,
    lifecycle: Arc<LifecycleController>,
    pool: Arc<WorkerPool>,
    metrics: Arc<Metrics>,
}

impl Gateway {
    /// Build a gateway generating fresh key material for every connection.
    pub fn new(config: GatewayConfig, resolver: Arc<dyn HandlerResolver>) -> Result<Self> {
        let keys = Arc::new(RandomKeyFactory::from_config(&config.crypto));
        Self::with_key_factory(config, resolver, keys)
    }

    /// Build a gateway with a custom key source.
    pub fn with_key_factory(
        config: GatewayConfig,
        resolver: Arc<dyn HandlerResolver>,
        keys: Arc<dyn KeyFactory>,
    ) -> Result<Self> {
        config.validate_strict()?;

        let metrics = Arc::new(Metrics::new());
        let codec = FrameCodec::new(config.server.header_width)
            .with_max_frame_length(config.server.max_frame_length);
        let registry = SessionRegistry::new();
        let connections = ConnectionTable::with_queue_bound(config.server.writer_queue_bound);
        let sink: Arc<dyn FrameSink> = Arc::new(connections.clone());

        let outbound = Arc::new(OutboundPipeline::new(
            registry.clone(),
            codec,
            config.crypto.static_key.clone(),
            metrics.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            config.server.worker_threads,
            config.server.worker_queue_bound,
            outbound.clone(),
            sink.clone(),
            metrics.clone(),
        )?);
        let inbound = Arc::new(InboundPipeline::new(
            registry.clone(),
            resolver,
            pool.clone(),
            metrics.clone(),
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            registry.clone(),
            keys,
            outbound.clone(),
            sink,
            config.crypto.protocol_revision,
            metrics.clone(),
        ));

        info!(
            app = %config.logging.app_name,
            workers = config.server.worker_threads,
            header_width = codec.width().size(),
            max_frame_length = codec.max_frame_length(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            codec,
            registry,
            connections,
            outbound,
            inbound,
            lifecycle,
            pool,
            metrics,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn outbound(&self) -> &OutboundPipeline {
        &self.outbound
    }

    pub fn inbound(&self) -> &InboundPipeline {
        &self.inbound
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the worker pool after draining queued packets. Blocks.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.metrics.log_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dispatcher::Dispatcher;

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = GatewayConfig::default_with_overrides(|c| c.crypto.rsa_key_bits = 2048);
        assert!(Gateway::new(config, Arc::new(Dispatcher::new())).is_err());
    }

    #[test]
    fn test_components_share_registry() {
        let config = GatewayConfig::default_with_overrides(|c| c.server.worker_threads = 1);
        let gateway = Gateway::new(config, Arc::new(Dispatcher::new())).unwrap();
        assert!(gateway.registry().is_empty());
        assert!(gateway.connections().is_empty());
        assert_eq!(gateway.codec().width().size(), 2);
        gateway.shutdown();
    }

    #[test]
    fn test_limits_come_from_config() {
        let config = GatewayConfig::default_with_overrides(|c| {
            c.server.worker_threads = 1;
            c.server.header_width = crate::core::codec::HeaderWidth::Int;
            c.server.max_frame_length = 8192;
            c.server.writer_queue_bound = 32;
        });
        let gateway = Gateway::new(config, Arc::new(Dispatcher::new())).unwrap();
        assert_eq!(gateway.codec().max_frame_length(), 8192);
        assert_eq!(gateway.connections().queue_bound(), 32);
        gateway.shutdown();
    }
}
