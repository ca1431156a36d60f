//! # Legacy Handshake Cipher
//!
//! AES-128 in ECB mode with PKCS#7 padding.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       LEGACY HANDSHAKE CIPHER                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  plaintext ──PKCS#7──► [ block 0 ][ block 1 ] ... [ block n ]          │
//! │                            │          │               │                │
//! │                          AES-128    AES-128         AES-128            │
//! │                            │          │               │                │
//! │                            ▼          ▼               ▼                │
//! │  ciphertext            [ c0       ][ c1       ] ... [ cn       ]       │
//! │                                                                         │
//! │  • No IV, no chaining, no authentication                               │
//! │  • Equal plaintext blocks produce equal ciphertext blocks              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security
//!
//! This mode is only here because the device-verification server speaks
//! nothing else. It is reachable solely through [`LegacyHandshakeCipher`] and
//! must not be used for any other protocol. New code that needs symmetric
//! encryption should use an AEAD construction instead.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::DecryptionError;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Handshake symmetric key size (128 bits)
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// A 128-bit key, fresh per handshake unless the caller supplies one.
///
/// Zeroized on drop. Never logged or persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Draw a fresh key from the OS RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rngs::OsRng)
    }

    /// Draw a fresh key from the given RNG
    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap caller-supplied key bytes
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// A symmetric block-cipher with padding.
///
/// The handshake is written against this seam so the weak mode stays
/// confined to one named adapter.
pub trait SymmetricCipher {
    /// Encrypt `plaintext`; total for any input length, including zero
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Vec<u8>;

    /// Decrypt `ciphertext`, validating length and padding
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &SymmetricKey,
    ) -> std::result::Result<Vec<u8>, DecryptionError>;
}

/// AES-128-ECB/PKCS#7, as required by the device-verification server
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyHandshakeCipher;

impl SymmetricCipher for LegacyHandshakeCipher {
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Vec<u8> {
        let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));

        let mut buf = pkcs7_pad(plaintext);
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        }
        buf
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &SymmetricKey,
    ) -> std::result::Result<Vec<u8>, DecryptionError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(DecryptionError::BadLength(ciphertext.len()));
        }

        let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));

        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }

        let unpadded_len = pkcs7_unpadded_len(&buf)?;
        buf.truncate(unpadded_len);
        Ok(buf)
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    // A full block of padding when already aligned
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

fn pkcs7_unpadded_len(data: &[u8]) -> std::result::Result<usize, DecryptionError> {
    let pad = match data.last() {
        Some(&b) => b as usize,
        None => return Err(DecryptionError::BadPadding),
    };
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(DecryptionError::BadPadding);
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(DecryptionError::BadPadding);
    }
    Ok(data.len() - pad)
}

// ============================================================================
// TESTS
// ============================================================================
