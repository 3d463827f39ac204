//! # Transport Layer
//!
//! TCP listener, live connection table and the session registry keyed by
//! connection.

pub mod connections;
pub mod session_registry;
pub mod tcp;
