//! # auth-gateway
//!
//! Connection handling and handshake core of a game authentication gateway.
//!
//! Clients connect over TCP and receive an `Init` packet carrying a fresh
//! RSA public key (with its modulus scrambled) and a session Blowfish key,
//! obfuscated with a static XOR key. Every later packet in either direction
//! is padded to the Blowfish block size, checksummed and Blowfish-encrypted,
//! then wrapped in a little-endian length-prefixed frame.
//!
//! ## Layers
//! - [`core`]: frame codec and packet buffers
//! - [`protocol`]: messages, handshake key material, dispatch, pipelines
//! - [`transport`]: TCP server, connection table, session registry
//! - [`service`]: gateway assembly and connection lifecycle
//! - [`utils`]: crypto transforms, logging, metrics, worker pool
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use auth_gateway::config::GatewayConfig;
//! use auth_gateway::protocol::dispatcher::{handler_fn, Dispatcher};
//! use auth_gateway::protocol::message::OutgoingMessage;
//! use auth_gateway::service::gateway::Gateway;
//! use auth_gateway::transport::tcp::Server;
//!
//! # async fn run() -> auth_gateway::error::Result<()> {
//! let config = GatewayConfig::default();
//! auth_gateway::utils::logging::init_logging(&config.logging);
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(0x07, handler_fn(|_, msg| {
//!     Ok(Some(OutgoingMessage::generic(0x0B, msg.body().to_vec())))
//! }));
//!
//! let gateway = Arc::new(Gateway::new(config, Arc::new(dispatcher))?);
//! Server::bind(gateway).await?.run().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::GatewayConfig;
pub use error::{ProtocolError, Result};
pub use service::gateway::Gateway;
pub use transport::tcp::Server;
