//! # Frame Codec
//!
//! Length-prefixed framing for the gateway wire protocol.
//!
//! ## Wire Format
//! ```text
//! [Length(1|2|4, LE)] [Body(Length - header width)]
//! ```
//!
//! The length field counts its own bytes. The gateway uses the 2-byte
//! variant, so a frame carries at most `0xFFFF - 2` body bytes.
//!
//! ## Size limit
//! Independently of the header width, frames longer than the codec's
//! maximum frame length are rejected with [`ProtocolError::OversizedFrame`].
//! The decoder checks the announced length before reserving any buffer
//! space for the body.
//!
//! ## End of stream
//! A close with nothing buffered is a soft end of stream and surfaces as
//! `Ok(None)` from [`Decoder::decode_eof`]. A close inside the header or the
//! body is reported as [`ProtocolError::TruncatedHeader`] or
//! [`ProtocolError::TruncatedBody`].

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, Result};

/// Width of the little-endian length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderWidth {
    UnsignedByte,
    #[default]
    UnsignedShort,
    Int,
}

impl HeaderWidth {
    /// Number of header bytes on the wire.
    pub const fn size(self) -> usize {
        match self {
            HeaderWidth::UnsignedByte => 1,
            HeaderWidth::UnsignedShort => 2,
            HeaderWidth::Int => 4,
        }
    }

    /// Largest total length (header included) the header can carry.
    pub const fn max_length(self) -> usize {
        match self {
            HeaderWidth::UnsignedByte => 0xFF,
            HeaderWidth::UnsignedShort => 0xFFFF,
            HeaderWidth::Int => i32::MAX as usize,
        }
    }

    /// Largest body that still fits a single frame.
    pub const fn max_body(self) -> usize {
        self.max_length() - self.size()
    }

    fn write(self, length: usize, dst: &mut BytesMut) {
        match self {
            HeaderWidth::UnsignedByte => dst.put_u8(length as u8),
            HeaderWidth::UnsignedShort => dst.put_u16_le(length as u16),
            HeaderWidth::Int => dst.put_i32_le(length as i32),
        }
    }

    fn read(self, src: &[u8]) -> i64 {
        match self {
            HeaderWidth::UnsignedByte => i64::from(src[0]),
            HeaderWidth::UnsignedShort => i64::from(u16::from_le_bytes([src[0], src[1]])),
            HeaderWidth::Int => i64::from(i32::from_le_bytes([src[0], src[1], src[2], src[3]])),
        }
    }
}

/// Default upper bound on a frame, header included.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 0xFFFF;

impl std::str::FromStr for HeaderWidth {
    type Err = ProtocolError;

    /// Accepts the byte count or the configuration name.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "unsigned_byte" => Ok(HeaderWidth::UnsignedByte),
            "2" | "unsigned_short" => Ok(HeaderWidth::UnsignedShort),
            "4" | "int" => Ok(HeaderWidth::Int),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown header width: '{other}'"
            ))),
        }
    }
}

/// Stateless length-prefix codec. Safe to clone per connection.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    width: HeaderWidth,
    max_frame_length: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(HeaderWidth::default())
    }
}

impl FrameCodec {
    pub fn new(width: HeaderWidth) -> Self {
        Self {
            width,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Cap the total frame length, header included.
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn width(&self) -> HeaderWidth {
        self.width
    }

    /// Effective limit: the configured cap or what the header can express.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length.min(self.width.max_length())
    }

    /// Write `header || body` into `dst`.
    ///
    /// Fails without touching `dst` with [`ProtocolError::LengthOverflow`]
    /// when the total length does not fit the header, or with
    /// [`ProtocolError::OversizedFrame`] when it exceeds the frame cap.
    pub fn encode_frame(&self, body: &[u8], dst: &mut BytesMut) -> Result<()> {
        let length = self.width.size() + body.len();
        if length > self.width.max_length() {
            return Err(ProtocolError::LengthOverflow {
                length,
                width: self.width.size(),
            });
        }
        if length > self.max_frame_length {
            return Err(ProtocolError::OversizedFrame {
                length,
                max: self.max_frame_length,
            });
        }

        dst.reserve(length);
        self.width.write(length, dst);
        dst.extend_from_slice(body);
        Ok(())
    }

    /// Body length announced by a complete header, validated.
    fn body_length(&self, header: &[u8]) -> Result<usize> {
        let declared = self.width.read(header);
        let body = declared - self.width.size() as i64;
        if body < 0 {
            return Err(ProtocolError::NegativeLength(body));
        }
        let max = self.max_frame_length();
        if declared as usize > max {
            return Err(ProtocolError::OversizedFrame {
                length: declared as usize,
                max,
            });
        }
        Ok(body as usize)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = self.width.size();
        if src.len() < header {
            return Ok(None);
        }

        let body = self.body_length(&src[..header])?;
        if src.len() < header + body {
            src.reserve(header + body - src.len());
            return Ok(None);
        }

        src.advance(header);
        Ok(Some(src.split_to(body)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let header = self.width.size();
        if src.len() < header {
            return Err(ProtocolError::TruncatedHeader {
                read: src.len(),
                expected: header,
            });
        }

        let expected = self.body_length(&src[..header])?;
        Err(ProtocolError::TruncatedBody {
            read: src.len() - header,
            expected,
        })
    }
}

impl<B: AsRef<[u8]>> Encoder<B> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: B, dst: &mut BytesMut) -> Result<()> {
        self.encode_frame(body.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_counts_itself() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode_frame(&[0xAA, 0xBB, 0xCC], &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x05, 0x00, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x06, 0x00, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x02, 0x03, 0x04]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[0x01, 0x02, 0x03, 0x04]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_body_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x02, 0x00][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_soft_eof_between_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_truncated_header_on_eof() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x07][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedHeader { read: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_truncated_body_on_eof() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x0A, 0x00, 0x01, 0x02][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedBody { read: 2, expected: 8 })
        ));
    }

    #[test]
    fn test_header_smaller_than_itself() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0x01, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::NegativeLength(-1))
        ));
    }

    #[test]
    fn test_negative_int_header() {
        let mut codec = FrameCodec::new(HeaderWidth::Int);
        let mut buf = BytesMut::from(&(-5i32).to_le_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::NegativeLength(_))
        ));
    }

    #[test]
    fn test_byte_header_overflow() {
        let codec = FrameCodec::new(HeaderWidth::UnsignedByte);
        let mut buf = BytesMut::new();
        codec.encode_frame(&[0u8; 254], &mut buf).unwrap();
        assert_eq!(buf[0], 0xFF);

        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode_frame(&[0u8; 255], &mut buf),
            Err(ProtocolError::LengthOverflow { length: 256, width: 1 })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_int_header_rejected_before_reserve() {
        let mut codec = FrameCodec::new(HeaderWidth::Int);
        let mut buf = BytesMut::from(&0x4000_0000i32.to_le_bytes()[..]);
        let capacity = buf.capacity();

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame {
                length: 0x4000_0000,
                max: DEFAULT_MAX_FRAME_LENGTH
            })
        ));
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_frame_cap_is_configurable() {
        let mut codec = FrameCodec::new(HeaderWidth::Int).with_max_frame_length(16);
        assert_eq!(codec.max_frame_length(), 16);

        let mut buf = BytesMut::new();
        codec.encode_frame(&[0u8; 12], &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 12);

        let mut buf = BytesMut::from(&17i32.to_le_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame { length: 17, max: 16 })
        ));

        let mut out = BytesMut::new();
        assert!(matches!(
            codec.encode_frame(&[0u8; 13], &mut out),
            Err(ProtocolError::OversizedFrame { length: 17, max: 16 })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_header_width_from_str() {
        assert_eq!("4".parse::<HeaderWidth>().unwrap(), HeaderWidth::Int);
        assert_eq!(
            "unsigned_short".parse::<HeaderWidth>().unwrap(),
            HeaderWidth::UnsignedShort
        );
        assert!("3".parse::<HeaderWidth>().is_err());
    }

    #[test]
    fn test_cap_never_exceeds_header_range() {
        let codec = FrameCodec::new(HeaderWidth::UnsignedByte).with_max_frame_length(1 << 20);
        assert_eq!(codec.max_frame_length(), 0xFF);
    }
}
