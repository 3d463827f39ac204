//! # Error Types
//!
//! Error handling for the gateway's framing, cryptographic and dispatch layers.
//!
//! ## Error Categories
//! - **Framing**: truncated or malformed length-prefixed frames
//! - **Cryptographic**: checksum mismatches, misaligned cipher blocks, bad keys
//! - **Session**: frames or messages for connections without key material
//! - **Dispatch**: opcodes without a registered handler
//!
//! A clean close between frames is not an error: the frame decoder reports it
//! as `Ok(None)`.
//!
//! Framing, cryptographic and session failures are fatal for the offending
//! connection only (see [`ProtocolError::is_connection_fatal`]). Dispatch
//! failures drop the single message and keep the connection open.
//!
//! ## Example Usage
//! ```rust
//! use auth_gateway::error::{ProtocolError, Result};
//! use auth_gateway::utils::crypto::validate_checksum;
//! use bytes::BytesMut;
//! use tracing::warn;
//!
//! fn check(frame: &mut BytesMut) -> Result<()> {
//!     validate_checksum(frame)
//! }
//!
//! let mut frame = BytesMut::from(&[1u8, 2, 3, 4, 0, 0, 0, 0][..]);
//! match check(&mut frame) {
//!     Err(e @ ProtocolError::ChecksumMismatch { .. }) => warn!(error = %e, "Dropping frame"),
//!     other => println!("{other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::message::ConnectionId;

// ProtocolError is the primary error type for all gateway operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream closed inside frame header ({read} of {expected} bytes)")]
    TruncatedHeader { read: usize, expected: usize },

    #[error("Stream closed inside frame body ({read} of {expected} bytes)")]
    TruncatedBody { read: usize, expected: usize },

    #[error("Frame length {length} does not fit a {width}-byte header")]
    LengthOverflow { length: usize, width: usize },

    #[error("Frame header length {0} is smaller than the header itself")]
    NegativeLength(i64),

    #[error("Frame too large: {length} bytes (maximum: {max})")]
    OversizedFrame { length: usize, max: usize },

    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("No session for connection {0}")]
    UnknownSession(ConnectionId),

    #[error("Connection {0} already has a session")]
    DuplicateSession(ConnectionId),

    #[error("No handler registered for opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Packet without opcode")]
    EmptyPacket,

    #[error("Buffer of {0} bytes is not a valid block length")]
    InvalidBlockLength(usize),

    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("RSA modulus of {0} bytes cannot be scrambled")]
    InvalidModulus(usize),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Outgoing message has no target connection")]
    MissingTarget,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue of connection {0} is full")]
    Backpressure(ConnectionId),

    #[error("Worker pool is shut down")]
    WorkerPoolClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error must terminate the connection it occurred on.
    ///
    /// Dispatch failures are message-local; everything that leaves the
    /// stream or the key schedule in an unknown state is fatal.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnknownOpcode(_) | ProtocolError::EmptyPacket | ProtocolError::Custom(_)
        )
    }
}

impl From<rsa::Error> for ProtocolError {
    fn from(err: rsa::Error) -> Self {
        ProtocolError::KeyGeneration(err.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
