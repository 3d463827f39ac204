//! # Service Layer
//!
//! Gateway assembly and the connection lifecycle.

pub mod gateway;
pub mod lifecycle;
