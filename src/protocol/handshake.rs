//! Per-connection key material for the legacy RSA/Blowfish handshake.
//!
//! On accept the gateway generates a fresh RSA keypair and a random Blowfish
//! key, then announces both in the `Init` packet. The RSA modulus goes out
//! "scrambled": a fixed, reversible byte permutation the client undoes before
//! using the key. It is a legacy protocol requirement, not a cryptographic
//! primitive, and must match the client bit for bit.
//!
//! Key generation sits behind [`KeyFactory`] so tests can run with
//! deterministic key material.

use rand::RngCore;
use rsa::pkcs8::DecodePrivateKey;
use rsa::rand_core::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::config::CryptoConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::SessionCipher;
use tracing::{debug, instrument};

/// Length of the scrambled modulus on the wire (1024-bit keys).
pub const MODULUS_LEN: usize = 128;

/// RSA key size the scrambling is defined for.
pub const RSA_KEY_BITS: usize = MODULUS_LEN * 8;

/// Session Blowfish key length used by current clients.
pub const DEFAULT_BLOWFISH_KEY_LEN: usize = 16;

/// Protocol revision announced in `Init`.
pub const DEFAULT_PROTOCOL_REVISION: u32 = 0x0000_c621;

const HALF: usize = MODULUS_LEN / 2;

/// Scramble a big-endian RSA modulus for the `Init` packet.
///
/// Accepts a modulus with leading zero bytes (e.g. a sign byte) and left-pads
/// short ones; anything that does not fit 128 bytes is rejected.
pub fn scramble_modulus(modulus: &[u8]) -> Result<[u8; MODULUS_LEN]> {
    let first = modulus
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(modulus.len());
    let significant = &modulus[first..];
    if significant.len() > MODULUS_LEN {
        return Err(ProtocolError::InvalidModulus(modulus.len()));
    }

    let mut m = [0u8; MODULUS_LEN];
    m[MODULUS_LEN - significant.len()..].copy_from_slice(significant);

    for i in 0..4 {
        m.swap(i, 0x4d + i);
    }
    for i in 0..HALF {
        m[i] ^= m[HALF + i];
    }
    for i in 0..4 {
        m[0x0d + i] ^= m[0x34 + i];
    }
    for i in 0..HALF {
        m[HALF + i] ^= m[i];
    }
    Ok(m)
}

/// Inverse of [`scramble_modulus`], as performed by the client.
pub fn unscramble_modulus(scrambled: &[u8; MODULUS_LEN]) -> [u8; MODULUS_LEN] {
    let mut m = *scrambled;
    for i in 0..HALF {
        m[HALF + i] ^= m[i];
    }
    for i in 0..4 {
        m[0x0d + i] ^= m[0x34 + i];
    }
    for i in 0..HALF {
        m[i] ^= m[HALF + i];
    }
    for i in 0..4 {
        m.swap(i, 0x4d + i);
    }
    m
}

/// RSA keypair plus Blowfish key for one connection. Immutable once built.
pub struct KeyMaterial {
    rsa: RsaPrivateKey,
    scrambled_modulus: [u8; MODULUS_LEN],
    blowfish_key: Zeroizing<Vec<u8>>,
    cipher: SessionCipher,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("rsa_bits", &(self.rsa.size() * 8))
            .field("blowfish_key_len", &self.blowfish_key.len())
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn new(rsa: RsaPrivateKey, blowfish_key: Vec<u8>) -> Result<Self> {
        let blowfish_key = Zeroizing::new(blowfish_key);
        let scrambled_modulus = scramble_modulus(&rsa.n().to_bytes_be())?;
        let cipher = SessionCipher::new(&blowfish_key)?;
        Ok(Self {
            rsa,
            scrambled_modulus,
            blowfish_key,
            cipher,
        })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.rsa.to_public_key()
    }

    pub fn scrambled_modulus(&self) -> &[u8; MODULUS_LEN] {
        &self.scrambled_modulus
    }

    pub fn blowfish_key(&self) -> &[u8] {
        &self.blowfish_key
    }

    /// Blowfish cipher keyed with [`KeyMaterial::blowfish_key`].
    pub fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    /// Raw (unpadded) RSA decryption of a block encrypted by the client with
    /// the announced public key. Output is left-padded to the modulus length.
    pub fn decrypt_block(&self, block: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if block.is_empty() || block.len() > MODULUS_LEN {
            return Err(ProtocolError::InvalidBlockLength(block.len()));
        }

        let c = BigUint::from_bytes_be(block);
        if &c >= self.rsa.n() {
            return Err(ProtocolError::InvalidBlockLength(block.len()));
        }

        let m = Zeroizing::new(c.modpow(self.rsa.d(), self.rsa.n()).to_bytes_be());
        let mut out = Zeroizing::new(vec![0u8; MODULUS_LEN]);
        out[MODULUS_LEN - m.len()..].copy_from_slice(&m);
        Ok(out)
    }
}

/// Source of per-connection key material.
pub trait KeyFactory: Send + Sync {
    fn generate(&self) -> Result<KeyMaterial>;
}

/// Fresh RSA keypair and random Blowfish key for every call.
#[derive(Debug, Clone)]
pub struct RandomKeyFactory {
    rsa_bits: usize,
    blowfish_key_len: usize,
}

impl RandomKeyFactory {
    pub fn new(rsa_bits: usize, blowfish_key_len: usize) -> Self {
        Self {
            rsa_bits,
            blowfish_key_len,
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.rsa_key_bits, config.blowfish_key_len)
    }
}

impl Default for RandomKeyFactory {
    fn default() -> Self {
        Self::new(RSA_KEY_BITS, DEFAULT_BLOWFISH_KEY_LEN)
    }
}

impl KeyFactory for RandomKeyFactory {
    #[instrument(level = "debug", skip(self), fields(bits = self.rsa_bits))]
    fn generate(&self) -> Result<KeyMaterial> {
        let rsa = RsaPrivateKey::new(&mut OsRng, self.rsa_bits)?;

        let mut blowfish_key = vec![0u8; self.blowfish_key_len];
        rand::rng().fill_bytes(&mut blowfish_key);

        debug!("Generated session key material");
        KeyMaterial::new(rsa, blowfish_key)
    }
}

/// Hands out copies of one keypair and Blowfish key. Meant for tests and
/// reproducible captures, never for production traffic.
#[derive(Clone)]
pub struct FixedKeyFactory {
    rsa: RsaPrivateKey,
    blowfish_key: Zeroizing<Vec<u8>>,
}

impl FixedKeyFactory {
    pub fn new(rsa: RsaPrivateKey, blowfish_key: Vec<u8>) -> Self {
        Self {
            rsa,
            blowfish_key: Zeroizing::new(blowfish_key),
        }
    }

    /// Load the keypair from a PKCS#8 PEM document.
    pub fn from_pkcs8_pem(pem: &str, blowfish_key: Vec<u8>) -> Result<Self> {
        let rsa = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| ProtocolError::KeyGeneration(format!("Invalid PKCS#8 key: {e}")))?;
        Ok(Self::new(rsa, blowfish_key))
    }
}

impl KeyFactory for FixedKeyFactory {
    fn generate(&self) -> Result<KeyMaterial> {
        KeyMaterial::new(self.rsa.clone(), self.blowfish_key.to_vec())
    }
}
