//! # Protocol Layer
//!
//! Messages, the legacy RSA/Blowfish handshake, opcode dispatch and the
//! packet pipelines between the transport and handlers.
//!
//! ## Components
//! - **Message**: outgoing message kinds and incoming packet views
//! - **Handshake**: per-connection key material and modulus scrambling
//! - **Dispatcher**: opcode to handler table
//! - **Pipeline**: outbound stage machine and inbound decode path

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod pipeline;

#[cfg(test)]
mod tests;
