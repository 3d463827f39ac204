//! # Core Wire Components
//!
//! Low-level framing and packet buffers.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed frames over byte streams
//! - **Packet**: little-endian writer/reader for message bodies
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE, includes itself)] [Body(Length - 2)]
//! ```

pub mod codec;
pub mod packet;
