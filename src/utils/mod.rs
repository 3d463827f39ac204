//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and handler
//! execution.
//!
//! ## Components
//! - **Crypto**: block padding, static-key XOR, checksum and Blowfish
//! - **Logging**: `tracing-subscriber` setup
//! - **Metrics**: thread-safe per-gateway counters
//! - **Worker Pool**: bounded handler threads with per-connection ordering
//!
//! ## Security
//! - Session keys are zeroed on drop (zeroize crate)
//! - Cryptographically secure RNG for all key material

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod worker_pool;

pub use metrics::{Metrics, MetricsSnapshot};
pub use worker_pool::WorkerPool;
