//! Key encapsulation for the device handshake.
//!
//! The handshake symmetric key travels to the verification server encrypted
//! under the server's RSA public key with PKCS#1 v1.5 encryption padding
//! (not OAEP; the server rejects anything else).

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use super::legacy_cipher::SymmetricKey;
use crate::error::{Error, Result};

/// Published public key of the device-verification server
pub const DEFAULT_SERVER_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAv9BDdhCDahZNFuJeesx3
gzoQfD7pE0AeWiNBZlc21ph6kU9zd58X/1warV3C1VIX0vMAmhOcj5u86i+L2Lb2
V68dX2Nb70MIDeW6Ibe8d0nF8D30tPsM7kaAyvxkY6ECM6RHGNhV4RrzkHmf5DeR
9bybQGE0A9jcjuxszD1wsW/n19eeom7MroHqlRorp5LLNR8bSbmhTw6M/RQ/Fm3l
KjKcvs1QNVyBNimrbD+ZVPE/KHSZLQ1jdF6tppvFnGxgJU9NFmxGFU0hx6cZiQHk
hOQfGDFkElxgtj8gFJ1narTwYbvfe5nGSiznv/EUJSjTHxzX1TEkex0+5j4vSANt
1QIDAQAB
-----END PUBLIC KEY-----";

/// Length of the substitute emitted when the server key is unusable
/// (the modulus size of the published 2048-bit key)
pub const DEGRADED_WRAPPED_KEY_LEN: usize = 256;

/// A symmetric key encrypted for the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    bytes: Vec<u8>,
    degraded: bool,
}

impl WrappedKey {
    /// Raw wrapped bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Transport encoding (standard base64)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `true` when these bytes are a random substitute rather than a real
    /// encryption; the server will not be able to unwrap them.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Wraps handshake keys under the server's public key.
#[derive(Debug, Clone)]
pub struct KeyEncapsulator {
    server_key: Option<RsaPublicKey>,
}

impl KeyEncapsulator {
    /// Build from a PEM public key (SPKI `PUBLIC KEY`, or PKCS#1
    /// `RSA PUBLIC KEY`).
    ///
    /// Never fails. An unparseable key puts the encapsulator on the degraded
    /// path: every [`wrap`](Self::wrap) then returns a random substitute of
    /// the expected length and the handshake will fail downstream, ending in a
    /// local-fallback token.
    pub fn from_pem(pem: &str) -> Self {
        match parse_public_key_pem(pem) {
            Ok(key) => {
                tracing::debug!(modulus_bits = key.size() * 8, "Parsed server public key");
                Self {
                    server_key: Some(key),
                }
            }
            Err(e) => {
                tracing::warn!(
                    reason = %e,
                    "Server public key unusable; key wrapping will emit random substitutes"
                );
                Self { server_key: None }
            }
        }
    }

    /// Build around an already parsed key
    pub fn from_public_key(key: RsaPublicKey) -> Self {
        Self {
            server_key: Some(key),
        }
    }

    /// `true` if wrapping will produce substitutes
    pub fn is_degraded(&self) -> bool {
        self.server_key.is_none()
    }

    /// Encrypt the raw key bytes with PKCS#1 v1.5
    ///
    /// ## Errors
    ///
    /// `Error::Encryption` if the RSA primitive itself fails. An unusable
    /// server key is not an error (see [`from_pem`](Self::from_pem)).
    pub fn wrap(&self, key: &SymmetricKey) -> Result<WrappedKey> {
        match &self.server_key {
            Some(server_key) => {
                let bytes = server_key
                    .encrypt(&mut OsRng, Pkcs1v15Encrypt, key.as_bytes())
                    .map_err(|e| Error::Encryption(e.to_string()))?;
                Ok(WrappedKey {
                    bytes,
                    degraded: false,
                })
            }
            None => {
                let mut bytes = vec![0u8; DEGRADED_WRAPPED_KEY_LEN];
                OsRng.fill_bytes(&mut bytes);
                tracing::warn!(
                    len = DEGRADED_WRAPPED_KEY_LEN,
                    "Emitting random substitute for wrapped key; handshake will not verify"
                );
                Ok(WrappedKey {
                    bytes,
                    degraded: true,
                })
            }
        }
    }
}

impl Default for KeyEncapsulator {
    fn default() -> Self {
        Self::from_pem(DEFAULT_SERVER_PUBLIC_KEY_PEM)
    }
}

/// Parse an RSA public key from SPKI or PKCS#1 PEM
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::InvalidKey(e.to_string()))
}
