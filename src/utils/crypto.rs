//! # Cryptographic Transforms
//!
//! Stateless byte-buffer transforms applied by the packet pipelines.
//!
//! - **Padding**: zero fill up to the 8-byte Blowfish block size
//! - **Static key**: repeating-key XOR used only for the handshake packet
//! - **Checksum**: XOR of little-endian `u32` words, stored as the last word
//! - **Session cipher**: Blowfish (little-endian word order) in ECB mode
//!
//! The checksum and the static-key pass are legacy protocol transforms. They
//! provide integrity against accidental corruption and obfuscation of the
//! handshake, not security.
//!
//! ## Layout of a checksummed packet
//! ```text
//! [Payload(N)] [Zero pad] [Checksum(4)]   total % 8 == 0
//! ```

use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::BlowfishLE;
use bytes::BytesMut;

use crate::error::{ProtocolError, Result};

/// Blowfish block size.
pub const BLOCK_SIZE: usize = 8;

/// Size of the trailing checksum word.
pub const CHECKSUM_SIZE: usize = 4;

/// Fill byte used for padding.
pub const PADDING_FILL: u8 = 0x00;

/// Smallest and largest Blowfish key accepted.
pub const MIN_KEY_LEN: usize = 4;
pub const MAX_KEY_LEN: usize = 56;

/// Pad `buf` with [`PADDING_FILL`] so that `buf.len() + reserved` is a
/// multiple of [`BLOCK_SIZE`]. `reserved` covers trailing bytes a later stage
/// appends (the checksum word).
pub fn append_padding(buf: &mut BytesMut, reserved: usize) {
    let rem = (buf.len() + reserved) % BLOCK_SIZE;
    if rem != 0 {
        buf.resize(buf.len() + BLOCK_SIZE - rem, PADDING_FILL);
    }
}

/// XOR `buf` with the repeating static key. Applying it twice restores the
/// input, so the client decodes with the same function.
pub fn xor_static_key(buf: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in buf.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// XOR of all little-endian `u32` words in `data`. `data.len()` must be a
/// multiple of four.
pub fn compute_checksum(data: &[u8]) -> u32 {
    data.chunks_exact(CHECKSUM_SIZE)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0, |acc, word| acc ^ word)
}

/// Append the checksum of everything currently in `buf`.
pub fn append_checksum(buf: &mut BytesMut) -> Result<()> {
    if buf.len() % CHECKSUM_SIZE != 0 {
        return Err(ProtocolError::InvalidBlockLength(buf.len()));
    }
    let checksum = compute_checksum(buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Verify and strip the trailing checksum word.
///
/// A buffer too short to hold the checksum, or not made of whole words, fails
/// with [`ProtocolError::InvalidBlockLength`] carrying its length.
pub fn validate_checksum(buf: &mut BytesMut) -> Result<()> {
    if buf.len() < CHECKSUM_SIZE || buf.len() % CHECKSUM_SIZE != 0 {
        return Err(ProtocolError::InvalidBlockLength(buf.len()));
    }

    let split = buf.len() - CHECKSUM_SIZE;
    let tail = &buf[split..];
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = compute_checksum(&buf[..split]);
    if expected != computed {
        return Err(ProtocolError::ChecksumMismatch { expected, computed });
    }

    buf.truncate(split);
    Ok(())
}

/// Per-session Blowfish cipher.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: BlowfishLE,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher { .. }")
    }
}

impl SessionCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = BlowfishLE::new_from_slice(key)
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Pad to the block size and encrypt in place.
    pub fn encrypt(&self, buf: &mut BytesMut) {
        append_padding(buf, 0);
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypt in place. Padding is left for the caller to interpret.
    pub fn decrypt(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % BLOCK_SIZE != 0 {
            return Err(ProtocolError::InvalidBlockLength(buf.len()));
        }
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}
