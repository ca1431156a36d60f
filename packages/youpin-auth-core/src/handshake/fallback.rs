//! Locally derived stand-in tokens.
//!
//! Used only after the handshake failed. The token is a SHA-256 over a
//! truncated view of the request and the current second, so two derivations
//! from the same request within one second agree. The server never issued it
//! and will not honor it; it is always marked [`Provenance::LocalFallback`].
//!
//! [`Provenance::LocalFallback`]: crate::token::Provenance::LocalFallback

use serde_json::json;
use sha2::{Digest, Sha256};

use super::fingerprint::DeviceFingerprint;
use crate::time::now_timestamp;
use crate::token::VerificationToken;

/// Characters of the encrypted payload that enter the digest
pub const PREFIX_LEN: usize = 40;

/// The fixed-shape subset of a handshake request the fallback digests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintPrefix {
    /// First [`PREFIX_LEN`] characters of the base64 encrypted payload
    pub encrypted_data: String,
    /// Fingerprint field names in byte-wise order
    pub field_names: Vec<String>,
}

impl FingerprintPrefix {
    pub fn new(encrypted_data: &str, fingerprint: &DeviceFingerprint) -> Self {
        Self {
            encrypted_data: encrypted_data.chars().take(PREFIX_LEN).collect(),
            field_names: fingerprint.field_names(),
        }
    }
}

/// Derives [`VerificationToken`]s without the server
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackDeriver;

impl FallbackDeriver {
    /// Derive a token for the current second
    pub fn derive(&self, prefix: &FingerprintPrefix) -> VerificationToken {
        self.derive_at(prefix, now_timestamp())
    }

    /// Derive a token for an explicit Unix second
    pub fn derive_at(&self, prefix: &FingerprintPrefix, unix_secs: i64) -> VerificationToken {
        // Keys in byte-wise order
        let material = json!({
            "encrypted_data": prefix.encrypted_data,
            "field_names": prefix.field_names,
            "timestamp": unix_secs,
        })
        .to_string();

        let token = VerificationToken::local_fallback(hex::encode(Sha256::digest(material.as_bytes())));
        tracing::warn!(
            token = %token.redacted(),
            "Derived local-fallback verification token; the server will not honor it"
        );
        token
    }
}
